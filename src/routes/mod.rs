use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod home_routes;
pub mod notification_routes;
pub mod schedule_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1", schedule_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", notification_routes::router())
        .merge(home_routes::router())
        .with_state(state)
}
