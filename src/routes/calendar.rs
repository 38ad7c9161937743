use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::db::models::SyncStatus;
use crate::db::repository::SlotEventRepository;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::calendar_sync::RetrySummary;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatusResponse {
    pending: i64,
    synced: i64,
    failed: i64,
}

async fn status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<SyncStatusResponse>> {
    if !user.can_manage_schedule() {
        return Err(AppError::Forbidden);
    }
    Ok(Json(SyncStatusResponse {
        pending: SlotEventRepository::count_by_sync_status(&state.db, SyncStatus::Pending).await?,
        synced: SlotEventRepository::count_by_sync_status(&state.db, SyncStatus::Synced).await?,
        failed: SlotEventRepository::count_by_sync_status(&state.db, SyncStatus::Failed).await?,
    }))
}

async fn retry(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<RetrySummary>> {
    if !user.can_manage_schedule() {
        return Err(AppError::Forbidden);
    }
    let summary = state
        .sync
        .retry_failed(&state.db, chrono::Utc::now().naive_utc())
        .await?;
    Ok(Json(summary))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/retry", post(retry))
}
