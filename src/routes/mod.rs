pub mod auth;
pub mod calendar;
pub mod events;
pub mod health;
pub mod locations;
pub mod requests;
pub mod schedule;

use axum::Router;

use crate::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest(
            "/locations",
            locations::router()
                .merge(schedule::router())
                .merge(requests::location_router()),
        )
        .nest("/requests", requests::router())
        .nest("/events", events::router())
        .nest("/calendar", calendar::router())
}
