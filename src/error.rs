use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

/// Failures surfaced by the service layer (schedule generator, booking
/// engine, query layer). Handlers convert these into `ApiError`.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("Patient not found for this user")]
    PatientNotFound,

    #[error("Appointment slot not found")]
    SlotNotFound,

    #[error("Appointment slot is already booked")]
    SlotUnavailable,

    #[error("Schedule has booked slots and cannot be modified")]
    ScheduleLocked,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Schedule not found")]
    ScheduleNotFound,

    #[error("Notification not found")]
    NotificationNotFound,

    #[error("Appointment is already cancelled")]
    AlreadyCancelled,

    #[error("Appointment is already confirmed")]
    AlreadyConfirmed,

    #[error("Appointment is in a terminal state")]
    AppointmentClosed,

    #[error("{0}")]
    Forbidden(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for DomainError {
    fn from(e: sqlx::Error) -> Self {
        DomainError::Database(e.to_string())
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Username or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        let msg = e.to_string();
        match e {
            DomainError::Validation(_) => ApiError::BadRequest("VALIDATION_ERROR", msg),
            DomainError::PatientNotFound => ApiError::NotFound("PATIENT_NOT_FOUND", msg),
            DomainError::SlotNotFound => ApiError::NotFound("SLOT_NOT_FOUND", msg),
            DomainError::SlotUnavailable => ApiError::Conflict("SLOT_UNAVAILABLE", msg),
            DomainError::ScheduleLocked => ApiError::Conflict("SCHEDULE_LOCKED", msg),
            DomainError::AppointmentNotFound => ApiError::NotFound("APPOINTMENT_NOT_FOUND", msg),
            DomainError::ScheduleNotFound => ApiError::NotFound("SCHEDULE_NOT_FOUND", msg),
            DomainError::NotificationNotFound => ApiError::NotFound("NOTIFICATION_NOT_FOUND", msg),
            DomainError::AlreadyCancelled => ApiError::BadRequest("ALREADY_CANCELLED", msg),
            DomainError::AlreadyConfirmed => ApiError::BadRequest("ALREADY_CONFIRMED", msg),
            DomainError::AppointmentClosed => ApiError::Conflict("APPOINTMENT_CLOSED", msg),
            DomainError::Forbidden(_) => ApiError::Forbidden("FORBIDDEN", msg),
            DomainError::Database(m) => ApiError::Internal(format!("db error: {m}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}
