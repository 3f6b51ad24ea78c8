use axum::{Json, Router, extract::State, routing::get};

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{AppState, role_to_string};

#[derive(serde::Serialize)]
pub struct HomeResponse {
    pub data: HomeData,
}

#[derive(serde::Serialize)]
pub struct HomeData {
    pub view: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/home", get(home))
}

/// Role-based landing payload: tells the client which view to render.
pub async fn home(
    State(_state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<HomeResponse>, ApiError> {
    Ok(Json(HomeResponse {
        data: HomeData {
            view: role_to_string(auth.role),
        },
    }))
}
