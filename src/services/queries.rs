use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::SlotRow;

/// Doctor-facing projection of an appointment joined through its slot.
/// Assembled here so call sites never walk nested optional records.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DoctorAppointmentView {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub status: String,
    pub reason: Option<String>,
    pub working_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PatientAppointmentView {
    pub appointment_id: Uuid,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub status: String,
    pub reason: Option<String>,
    pub working_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Who may act on an appointment; used by route-level authorization.
#[derive(Debug, FromRow)]
pub struct AppointmentParties {
    pub patient_user_id: Uuid,
    pub doctor_user_id: Uuid,
}

const DOCTOR_VIEW_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.patient_id,
      pu.display_name AS patient_name,
      a.status,
      a.reason,
      s.working_date,
      s.start_time,
      s.end_time
    FROM appointment a
    JOIN appointment_slot s ON s.slot_id = a.slot_id
    JOIN doctor_schedule ds ON ds.schedule_id = s.schedule_id
    JOIN patient p ON p.patient_id = a.patient_id
    JOIN app_user pu ON pu.user_id = p.user_id
"#;

/// The doctor's next upcoming appointment: PENDING/CONFIRMED only, slot
/// strictly in the future, earliest `(working_date, start_time)` first.
pub async fn next_appointment(
    pool: &PgPool,
    doctor_id: Uuid,
    today: NaiveDate,
    now: NaiveTime,
) -> Result<Option<DoctorAppointmentView>, DomainError> {
    let row: Option<DoctorAppointmentView> = sqlx::query_as(&format!(
        r#"
        {DOCTOR_VIEW_SELECT}
        WHERE ds.doctor_id = $1
          AND a.status IN ('PENDING', 'CONFIRMED')
          AND (s.working_date > $2 OR (s.working_date = $2 AND s.start_time > $3))
        ORDER BY s.working_date ASC, s.start_time ASC
        LIMIT 1
        "#
    ))
    .bind(doctor_id)
    .bind(today)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// All PENDING/CONFIRMED appointments for a doctor on one date, ascending
/// by start time.
pub async fn appointments_on_day(
    pool: &PgPool,
    doctor_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<DoctorAppointmentView>, DomainError> {
    let rows: Vec<DoctorAppointmentView> = sqlx::query_as(&format!(
        r#"
        {DOCTOR_VIEW_SELECT}
        WHERE ds.doctor_id = $1
          AND s.working_date = $2
          AND a.status IN ('PENDING', 'CONFIRMED')
        ORDER BY s.start_time ASC
        "#
    ))
    .bind(doctor_id)
    .bind(date)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Historical visit counter: every appointment between the pair, any
/// status, cancellations included.
pub async fn count_visits(
    pool: &PgPool,
    patient_id: Uuid,
    doctor_id: Uuid,
) -> Result<i64, DomainError> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM appointment a
        JOIN appointment_slot s ON s.slot_id = a.slot_id
        JOIN doctor_schedule ds ON ds.schedule_id = s.schedule_id
        WHERE a.patient_id = $1
          AND ds.doctor_id = $2
        "#,
    )
    .bind(patient_id)
    .bind(doctor_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// The patient's own upcoming PENDING/CONFIRMED appointments.
pub async fn patient_upcoming(
    pool: &PgPool,
    patient_user_id: Uuid,
    today: NaiveDate,
    now: NaiveTime,
) -> Result<Vec<PatientAppointmentView>, DomainError> {
    let rows: Vec<PatientAppointmentView> = sqlx::query_as(
        r#"
        SELECT
          a.appointment_id,
          ds.doctor_id,
          du.display_name AS doctor_name,
          a.status,
          a.reason,
          s.working_date,
          s.start_time,
          s.end_time
        FROM appointment a
        JOIN appointment_slot s ON s.slot_id = a.slot_id
        JOIN doctor_schedule ds ON ds.schedule_id = s.schedule_id
        JOIN doctor d ON d.doctor_id = ds.doctor_id
        JOIN app_user du ON du.user_id = d.user_id
        JOIN patient p ON p.patient_id = a.patient_id
        WHERE p.user_id = $1
          AND a.status IN ('PENDING', 'CONFIRMED')
          AND (s.working_date > $2 OR (s.working_date = $2 AND s.start_time > $3))
        ORDER BY s.working_date ASC, s.start_time ASC
        "#,
    )
    .bind(patient_user_id)
    .bind(today)
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Unbooked slots for a doctor on a date, ascending by start time.
pub async fn available_slots(
    pool: &PgPool,
    doctor_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<SlotRow>, DomainError> {
    let rows: Vec<SlotRow> = sqlx::query_as(
        r#"
        SELECT s.slot_id, s.schedule_id, s.working_date, s.start_time, s.end_time, s.is_booked
        FROM appointment_slot s
        JOIN doctor_schedule ds ON ds.schedule_id = s.schedule_id
        WHERE ds.doctor_id = $1
          AND s.working_date = $2
          AND s.is_booked = false
        ORDER BY s.start_time ASC
        "#,
    )
    .bind(doctor_id)
    .bind(date)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Resolve both parties' user ids for an appointment.
pub async fn appointment_parties(
    pool: &PgPool,
    appointment_id: Uuid,
) -> Result<AppointmentParties, DomainError> {
    let row: Option<AppointmentParties> = sqlx::query_as(
        r#"
        SELECT p.user_id AS patient_user_id, d.user_id AS doctor_user_id
        FROM appointment a
        JOIN patient p ON p.patient_id = a.patient_id
        JOIN appointment_slot s ON s.slot_id = a.slot_id
        JOIN doctor_schedule ds ON ds.schedule_id = s.schedule_id
        JOIN doctor d ON d.doctor_id = ds.doctor_id
        WHERE a.appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await?;
    row.ok_or(DomainError::AppointmentNotFound)
}

pub async fn doctor_id_for_user(pool: &PgPool, user_id: Uuid) -> Result<Uuid, DomainError> {
    let row: Option<(Uuid,)> =
        sqlx::query_as(r#"SELECT doctor_id FROM doctor WHERE user_id = $1"#)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    row.map(|(id,)| id)
        .ok_or_else(|| DomainError::Forbidden("No doctor profile for this account".into()))
}

pub async fn patient_id_for_user(pool: &PgPool, user_id: Uuid) -> Result<Uuid, DomainError> {
    let row: Option<(Uuid,)> =
        sqlx::query_as(r#"SELECT patient_id FROM patient WHERE user_id = $1"#)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    row.map(|(id,)| id).ok_or(DomainError::PatientNotFound)
}
