// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, AppointmentDto},
    services::queries,
};

/*
Roles (app_user.role):
0 patient
1 admin
2 doctor
*/

fn is_patient(auth: &AuthContext) -> bool {
    auth.role == 0
}
fn is_admin(auth: &AuthContext) -> bool {
    auth.role == 1
}
fn is_doctor(auth: &AuthContext) -> bool {
    auth.role == 2
}

fn ensure_patient(auth: &AuthContext) -> Result<(), ApiError> {
    if is_patient(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only patients can book appointments".into(),
        ))
    }
}

fn ensure_doctor(auth: &AuthContext) -> Result<(), ApiError> {
    if is_doctor(auth) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Only doctors can access this view".into(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(create_appointment))
        .route("/appointments/mine", get(my_appointments))
        .route("/appointments/doctor/next", get(doctor_next))
        .route("/appointments/doctor/day", get(doctor_day))
        .route("/appointments/doctor/visits", get(doctor_visits))
        .route("/appointments/{appointment_id}/cancel", patch(cancel_appointment))
        .route("/appointments/{appointment_id}/confirm", patch(confirm_appointment))
        .route("/appointments/{appointment_id}/complete", patch(complete_appointment))
}

/* ============================================================
   Response envelope
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

/* ============================================================
   POST /appointments (book a slot)
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    pub slot_id: Uuid,
    pub reason: Option<String>,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BookRequest>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentDto>>), ApiError> {
    ensure_patient(&auth)?;

    let appointment = state
        .engine
        .book(&state.db, auth.user_id, req.slot_id, req.reason)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: appointment.try_into()?,
        }),
    ))
}

/* ============================================================
   PATCH /appointments/{id}/cancel | confirm | complete
   ============================================================ */

/// A patient may act on their own appointment; a doctor on appointments
/// under their own schedules; an admin on any.
async fn ensure_party(
    state: &AppState,
    auth: &AuthContext,
    appointment_id: Uuid,
    allow_patient: bool,
) -> Result<(), ApiError> {
    if is_admin(auth) {
        return Ok(());
    }

    let parties = queries::appointment_parties(&state.db, appointment_id).await?;

    if allow_patient && is_patient(auth) && parties.patient_user_id == auth.user_id {
        return Ok(());
    }
    if is_doctor(auth) && parties.doctor_user_id == auth.user_id {
        return Ok(());
    }

    Err(ApiError::Forbidden(
        "FORBIDDEN",
        "You may not act on this appointment".into(),
    ))
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_party(&state, &auth, appointment_id, true).await?;

    let appointment = state.engine.cancel(&state.db, appointment_id).await?;
    Ok(Json(ApiOk {
        data: appointment.try_into()?,
    }))
}

pub async fn confirm_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_party(&state, &auth, appointment_id, false).await?;

    let appointment = state.engine.confirm(&state.db, appointment_id).await?;
    Ok(Json(ApiOk {
        data: appointment.try_into()?,
    }))
}

/// Prescription finalization hook: marks the visit completed.
pub async fn complete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    ensure_party(&state, &auth, appointment_id, false).await?;

    let appointment = state
        .engine
        .complete_on_prescription(&state.db, appointment_id)
        .await?;
    Ok(Json(ApiOk {
        data: appointment.try_into()?,
    }))
}

/* ============================================================
   Doctor-facing projections
   ============================================================ */

pub async fn doctor_next(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<queries::DoctorAppointmentView>>, ApiError> {
    ensure_doctor(&auth)?;
    let doctor_id = queries::doctor_id_for_user(&state.db, auth.user_id).await?;

    let now = Utc::now().naive_utc();
    let next = queries::next_appointment(&state.db, doctor_id, now.date(), now.time()).await?;

    match next {
        Some(view) => Ok(Json(ApiOk { data: view })),
        None => Err(ApiError::NotFound(
            "NO_UPCOMING_APPOINTMENT",
            "No upcoming appointment".into(),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    // YYYY-MM-DD; defaults to today
    pub date: Option<String>,
}

pub async fn doctor_day(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<DayQuery>,
) -> Result<Json<ApiOk<Vec<queries::DoctorAppointmentView>>>, ApiError> {
    ensure_doctor(&auth)?;
    let doctor_id = queries::doctor_id_for_user(&state.db, auth.user_id).await?;

    let date = match q.date {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
            ApiError::BadRequest("VALIDATION_ERROR", "date must be YYYY-MM-DD".into())
        })?,
        None => Utc::now().date_naive(),
    };

    let rows = queries::appointments_on_day(&state.db, doctor_id, date).await?;
    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
pub struct VisitsQuery {
    pub patient_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct VisitCount {
    pub patient_id: Uuid,
    pub visits: i64,
}

pub async fn doctor_visits(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<VisitsQuery>,
) -> Result<Json<ApiOk<VisitCount>>, ApiError> {
    ensure_doctor(&auth)?;
    let doctor_id = queries::doctor_id_for_user(&state.db, auth.user_id).await?;

    let visits = queries::count_visits(&state.db, q.patient_id, doctor_id).await?;
    Ok(Json(ApiOk {
        data: VisitCount {
            patient_id: q.patient_id,
            visits,
        },
    }))
}

/* ============================================================
   GET /appointments/mine (patient)
   ============================================================ */

pub async fn my_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<queries::PatientAppointmentView>>>, ApiError> {
    ensure_patient(&auth)?;

    let now = Utc::now().naive_utc();
    let rows =
        queries::patient_upcoming(&state.db, auth.user_id, now.date(), now.time()).await?;
    Ok(Json(ApiOk { data: rows }))
}
