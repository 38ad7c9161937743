use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use sqlx::SqlitePool;

use crate::db::models::{Location, Room, User};
use crate::db::repository::{LocationRepository, RoomRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

/// Loads a location the user may see, or refuses. Super admins see every
/// location; everyone else goes through the agency link tables.
pub async fn accessible_location(
    pool: &SqlitePool,
    user: &User,
    location_id: &str,
) -> AppResult<Location> {
    let location = LocationRepository::find_by_id(pool, location_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Location not found".to_string()))?;
    if user.is_super_admin() {
        return Ok(location);
    }
    if !LocationRepository::user_has_access(pool, &user.id, location_id).await? {
        return Err(AppError::Forbidden);
    }
    Ok(location)
}

async fn list_locations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<Location>>> {
    let locations = if user.is_super_admin() {
        LocationRepository::list_active(&state.db).await?
    } else {
        LocationRepository::list_for_user(&state.db, &user.id).await?
    };
    Ok(Json(locations))
}

async fn get_location(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(location_id): Path<String>,
) -> AppResult<Json<Location>> {
    let location = accessible_location(&state.db, &user, &location_id).await?;
    Ok(Json(location))
}

async fn list_rooms(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(location_id): Path<String>,
) -> AppResult<Json<Vec<Room>>> {
    let location = accessible_location(&state.db, &user, &location_id).await?;
    let rooms = RoomRepository::list_active_for_location(&state.db, &location.id).await?;
    Ok(Json(rooms))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_locations))
        .route("/:location_id", get(get_location))
        .route("/:location_id/rooms", get(list_rooms))
}
