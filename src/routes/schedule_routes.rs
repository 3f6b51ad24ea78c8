// src/routes/schedule_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, OkData, OkResponse, ScheduleRow, SlotRow},
    services::{queries, schedule},
};

fn is_admin(auth: &AuthContext) -> bool {
    auth.role == 1
}
fn is_doctor(auth: &AuthContext) -> bool {
    auth.role == 2
}

fn ensure_doctor_or_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if is_doctor(auth) || is_admin(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only doctors can manage schedules".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedules", post(create_schedule))
        .route("/schedules/{schedule_id}", put(update_schedule))
        .route("/schedules/{schedule_id}", delete(delete_schedule))
        .route("/doctors/{doctor_id}/slots", get(doctor_slots))
}

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub working_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_min: i32,
}

#[derive(Debug, Serialize)]
pub struct ScheduleWithSlots {
    pub schedule: ScheduleRow,
    pub slots: Vec<SlotRow>,
}

impl ScheduleRequest {
    fn spec(&self) -> schedule::ScheduleSpec {
        schedule::ScheduleSpec {
            working_date: self.working_date,
            start_time: self.start_time,
            end_time: self.end_time,
            slot_duration_min: self.slot_duration_min,
        }
    }
}

/* ============================================================
   POST /schedules
   ============================================================ */

pub async fn create_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ApiOk<ScheduleWithSlots>>), ApiError> {
    ensure_doctor_or_admin(&auth)?;
    let doctor_id = queries::doctor_id_for_user(&state.db, auth.user_id).await?;

    let (schedule, slots) = schedule::create_schedule(&state.db, doctor_id, &req.spec()).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: ScheduleWithSlots { schedule, slots },
        }),
    ))
}

/* ============================================================
   PUT /schedules/{id}  (regenerate; 409 while any slot is booked)
   ============================================================ */

pub async fn update_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(schedule_id): Path<Uuid>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<ApiOk<ScheduleWithSlots>>, ApiError> {
    ensure_doctor_or_admin(&auth)?;
    let requester = if is_admin(&auth) {
        None
    } else {
        Some(queries::doctor_id_for_user(&state.db, auth.user_id).await?)
    };

    let (schedule, slots) =
        schedule::update_schedule(&state.db, schedule_id, requester, &req.spec()).await?;

    Ok(Json(ApiOk {
        data: ScheduleWithSlots { schedule, slots },
    }))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    ensure_doctor_or_admin(&auth)?;
    let requester = if is_admin(&auth) {
        None
    } else {
        Some(queries::doctor_id_for_user(&state.db, auth.user_id).await?)
    };

    schedule::delete_schedule(&state.db, schedule_id, requester).await?;

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

/* ============================================================
   GET /doctors/{doctor_id}/slots?date=YYYY-MM-DD
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

/// Open to any authenticated user: patients browse availability here.
pub async fn doctor_slots(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<ApiOk<Vec<SlotRow>>>, ApiError> {
    let date = NaiveDate::parse_from_str(q.date.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest("VALIDATION_ERROR", "date must be YYYY-MM-DD".into())
    })?;

    let slots = queries::available_slots(&state.db, doctor_id, date).await?;
    Ok(Json(ApiOk { data: slots }))
}
