// src/routes/notification_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, patch},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, NotificationRow},
    services::notify,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/{notification_id}/read", patch(mark_read))
}

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

/// Notifications are owned by their recipient; the list is always scoped to
/// the authenticated user.
pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<NotificationRow>>>, ApiError> {
    let rows = notify::list_notifications(&state.db, auth.user_id).await?;
    Ok(Json(ApiOk { data: rows }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<ApiOk<NotificationRow>>, ApiError> {
    let row = notify::mark_read(&state.db, notification_id, auth.user_id).await?;
    Ok(Json(ApiOk { data: row }))
}
