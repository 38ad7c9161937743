use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::error::AppResult;
use crate::routes::auth::AuthUser;
use crate::routes::locations::accessible_location;
use crate::services::availability::{self, WeeklyGrid};
use crate::services::booking;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct GridQuery {
    /// Any date inside the wanted week; defaults to the current week.
    week: Option<NaiveDate>,
}

async fn weekly_grid(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(location_id): Path<String>,
    Query(query): Query<GridQuery>,
) -> AppResult<Json<WeeklyGrid>> {
    let location = accessible_location(&state.db, &user, &location_id).await?;
    let today = booking::local_today(&location, Utc::now())?;
    booking::ensure_can_schedule(&state.db, &user.id, today).await?;

    let week_of = query.week.unwrap_or(today);

    let grid = availability::weekly_grid(
        &state.db,
        &location,
        week_of,
        state.config.schedule.grid_start_hour,
        state.config.schedule.grid_end_hour,
    )
    .await?;
    Ok(Json(grid))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/:location_id/schedule", get(weekly_grid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::config::Config;
    use crate::db::repository::{LocationRepository, UserRepository};
    use crate::error::AppError;
    use crate::services::calendar_sync::CalendarSyncService;
    use crate::services::init::test_pool;

    #[tokio::test]
    async fn grid_read_requires_valid_credentials() {
        let pool = test_pool().await;
        let config = Config::default();
        let sync = CalendarSyncService::new(config.calendar.clone()).unwrap();
        let state = AppState {
            db: pool.clone(),
            config,
            sync,
        };

        let location = LocationRepository::create(&pool, "Main Clinic", "America/New_York")
            .await
            .unwrap();
        let viewer = UserRepository::create(
            &pool, "admin@x.test", "hash", "Ada", "Moss", "super_admin", None,
        )
        .await
        .unwrap();
        UserRepository::add_compliance_document(
            &pool,
            &viewer.id,
            "License",
            true,
            Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
        )
        .await
        .unwrap();

        let result = weekly_grid(
            State(state),
            AuthUser(viewer),
            Path(location.id.clone()),
            Query(GridQuery { week: None }),
        )
        .await;
        assert!(matches!(result, Err(AppError::ComplianceBlocked)));
    }
}
