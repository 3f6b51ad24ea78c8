use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::DomainError;
use crate::services::booking::BookingEngine;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub engine: BookingEngine,
}

/* -------------------------
   Appointment status
--------------------------*/

/// Lifecycle: PENDING -> CONFIRMED -> COMPLETED; PENDING/CONFIRMED -> CANCELLED.
/// RESCHEDULED exists as a terminal tag with no transition writing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Rescheduled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Rescheduled => "RESCHEDULED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(AppointmentStatus::Pending),
            "CONFIRMED" => Some(AppointmentStatus::Confirmed),
            "CANCELLED" => Some(AppointmentStatus::Cancelled),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "RESCHEDULED" => Some(AppointmentStatus::Rescheduled),
            _ => None,
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub user: UserProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct AppointmentDto {
    pub appointment_id: Uuid,
    pub slot_id: Uuid,
    pub patient_id: Uuid,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub qr_data: Option<serde_json::Value>,
    pub is_booked: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for AppointmentDto {
    type Error = DomainError;

    // A status string outside the lifecycle set is a corrupted row, not
    // something to paper over in the response.
    fn try_from(row: AppointmentRow) -> Result<Self, DomainError> {
        let status = AppointmentStatus::parse(&row.status).ok_or_else(|| {
            DomainError::Database(format!("unknown appointment status {:?}", row.status))
        })?;
        Ok(AppointmentDto {
            appointment_id: row.appointment_id,
            slot_id: row.slot_id,
            patient_id: row.patient_id,
            status,
            reason: row.reason,
            qr_data: row.qr_data,
            is_booked: row.is_booked,
            created_at: row.created_at,
        })
    }
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: i16,
    pub is_active: bool,
}

#[derive(Debug, FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScheduleRow {
    pub schedule_id: Uuid,
    pub doctor_id: Uuid,
    pub working_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_min: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SlotRow {
    pub slot_id: Uuid,
    pub schedule_id: Uuid,
    pub working_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_booked: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub slot_id: Uuid,
    pub patient_id: Uuid,
    pub status: String,
    pub reason: Option<String>,
    pub qr_data: Option<serde_json::Value>,
    pub is_booked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NotificationRow {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/* -------------------------
   Helpers
--------------------------*/

/// Role mapping: 0 patient, 1 admin, 2 doctor.
pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "patient",
        1 => "admin",
        2 => "doctor",
        _ => "unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_with_status(status: &str) -> AppointmentRow {
        AppointmentRow {
            appointment_id: Uuid::new_v4(),
            slot_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            status: status.to_string(),
            reason: None,
            qr_data: None,
            is_booked: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn dto_conversion_parses_lifecycle_statuses() {
        let dto = AppointmentDto::try_from(row_with_status("CONFIRMED")).unwrap();
        assert_eq!(dto.status, AppointmentStatus::Confirmed);
    }

    #[test]
    fn dto_conversion_rejects_unknown_status() {
        let err = AppointmentDto::try_from(row_with_status("ARCHIVED")).unwrap_err();
        assert!(matches!(err, DomainError::Database(_)));
    }
}
