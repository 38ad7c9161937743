use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use crate::db::models::BookingRequest;
use crate::db::repository::BookingRequestRepository;
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::routes::locations::accessible_location;
use crate::services::booking::{self, ApprovedBooking, NewRequest, RequestOutcome};
use crate::AppState;

async fn create_request(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(location_id): Path<String>,
    Json(payload): Json<NewRequest>,
) -> AppResult<Json<RequestOutcome>> {
    let location = accessible_location(&state.db, &user, &location_id).await?;
    let outcome = booking::create_request(
        &state.db,
        &state.sync,
        &location,
        &user,
        payload,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome))
}

async fn list_pending(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(location_id): Path<String>,
) -> AppResult<Json<Vec<BookingRequest>>> {
    if !user.can_manage_schedule() {
        return Err(AppError::Forbidden);
    }
    let location = accessible_location(&state.db, &user, &location_id).await?;
    let pending =
        BookingRequestRepository::list_pending_for_location(&state.db, &location.id).await?;
    Ok(Json(pending))
}

async fn list_mine(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<BookingRequest>>> {
    let requests = BookingRequestRepository::list_for_provider(&state.db, &user.id).await?;
    Ok(Json(requests))
}

#[derive(Debug, Deserialize)]
struct DecisionPayload {
    comment: Option<String>,
}

async fn approve(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(request_id): Path<String>,
    payload: Option<Json<DecisionPayload>>,
) -> AppResult<Json<ApprovedBooking>> {
    let comment = payload.as_ref().and_then(|p| p.comment.as_deref());
    let approved = booking::approve_request(
        &state.db,
        &state.sync,
        &user,
        &request_id,
        comment,
        Utc::now(),
    )
    .await?;
    Ok(Json(approved))
}

async fn deny(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(request_id): Path<String>,
    payload: Option<Json<DecisionPayload>>,
) -> AppResult<Json<BookingRequest>> {
    let comment = payload.as_ref().and_then(|p| p.comment.as_deref());
    let denied = booking::deny_request(&state.db, &user, &request_id, comment).await?;
    Ok(Json(denied))
}

pub fn location_router() -> Router<AppState> {
    Router::new()
        .route("/:location_id/requests", post(create_request))
        .route("/:location_id/requests/pending", get(list_pending))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mine", get(list_mine))
        .route("/:request_id/approve", post(approve))
        .route("/:request_id/deny", post(deny))
}
