use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::models::SessionKind;
use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::services::booking::{self, CancelScope};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct CancelPayload {
    scope: CancelScope,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelResponse {
    cancelled: u64,
}

async fn cancel(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(event_id): Path<String>,
    Json(payload): Json<CancelPayload>,
) -> AppResult<Json<CancelResponse>> {
    let cancelled =
        booking::cancel_event(&state.db, &state.sync, &user, &event_id, payload.scope).await?;
    Ok(Json(CancelResponse { cancelled }))
}

#[derive(Debug, Deserialize)]
struct TogglePayload {
    enabled: bool,
}

async fn virtual_intake(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(event_id): Path<String>,
    Json(payload): Json<TogglePayload>,
) -> AppResult<Json<serde_json::Value>> {
    booking::set_intake_flag(
        &state.db,
        &user,
        &event_id,
        SessionKind::VirtualIntake,
        payload.enabled,
    )
    .await?;
    Ok(Json(serde_json::json!({ "enabled": payload.enabled })))
}

async fn in_person_intake(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(event_id): Path<String>,
    Json(payload): Json<TogglePayload>,
) -> AppResult<Json<serde_json::Value>> {
    booking::set_intake_flag(
        &state.db,
        &user,
        &event_id,
        SessionKind::InPersonIntake,
        payload.enabled,
    )
    .await?;
    Ok(Json(serde_json::json!({ "enabled": payload.enabled })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:event_id/cancel", post(cancel))
        .route("/:event_id/virtual-intake", post(virtual_intake))
        .route("/:event_id/in-person-intake", post(in_person_intake))
}
