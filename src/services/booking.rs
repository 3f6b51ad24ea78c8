use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::{AppointmentRow, AppointmentStatus};
use crate::services::notify::Notifier;
use crate::services::qr::QrIssuer;
use crate::services::queries;

/// The booking state machine. All slot/appointment mutations go through
/// here; QR issuance and notifications are injected so the engine owns the
/// post-commit side-effect policy and tests can swap in fakes.
#[derive(Clone)]
pub struct BookingEngine {
    notifier: Arc<dyn Notifier>,
    qr: Arc<dyn QrIssuer>,
}

#[derive(Debug, FromRow)]
struct SlotLockRow {
    slot_id: Uuid,
    is_booked: bool,
}

#[derive(Debug, FromRow)]
struct SlotContextRow {
    working_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    doctor_user_id: Uuid,
    patient_user_id: Uuid,
}

const APPOINTMENT_COLUMNS: &str =
    "appointment_id, slot_id, patient_id, status, reason, qr_data, is_booked, created_at";

impl BookingEngine {
    pub fn new(notifier: Arc<dyn Notifier>, qr: Arc<dyn QrIssuer>) -> Self {
        Self { notifier, qr }
    }

    /// Book a slot for the patient behind `patient_user_id`.
    ///
    /// The slot row is locked for the duration of the check-and-flip, so
    /// concurrent bookers serialize on it and every loser sees
    /// `SlotUnavailable`. The appointment insert and the slot flip commit
    /// together or not at all. QR issuance runs after commit; its failure
    /// degrades the response but never undoes the reservation.
    pub async fn book(
        &self,
        pool: &PgPool,
        patient_user_id: Uuid,
        slot_id: Uuid,
        reason: Option<String>,
    ) -> Result<AppointmentRow, DomainError> {
        let patient_id = queries::patient_id_for_user(pool, patient_user_id).await?;

        let mut tx = pool.begin().await?;

        let slot: Option<SlotLockRow> = sqlx::query_as(
            r#"SELECT slot_id, is_booked FROM appointment_slot WHERE slot_id = $1 FOR UPDATE"#,
        )
        .bind(slot_id)
        .fetch_optional(&mut *tx)
        .await?;

        let slot = slot.ok_or(DomainError::SlotNotFound)?;
        if slot.is_booked {
            return Err(DomainError::SlotUnavailable);
        }

        let appointment: AppointmentRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO appointment (slot_id, patient_id, status, reason, is_booked)
            VALUES ($1, $2, 'PENDING', $3, true)
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(slot.slot_id)
        .bind(patient_id)
        .bind(&reason)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            // The partial unique index backstops the row lock; a violation
            // means another booking won the slot.
            if is_unique_violation(&e) {
                DomainError::SlotUnavailable
            } else {
                DomainError::from(e)
            }
        })?;

        sqlx::query(r#"UPDATE appointment_slot SET is_booked = true WHERE slot_id = $1"#)
            .bind(slot.slot_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            appointment_id = %appointment.appointment_id,
            slot_id = %slot.slot_id,
            "appointment booked"
        );

        let mut appointment = appointment;
        let content = format!("appointment:{}", appointment.appointment_id);
        match self.qr.issue(pool, appointment.appointment_id, &content).await {
            Ok(data) => {
                appointment.qr_data = serde_json::to_value(&data).ok();
            }
            Err(e) => {
                warn!(
                    appointment_id = %appointment.appointment_id,
                    error = %e,
                    "QR issuance failed; booking stands"
                );
            }
        }

        Ok(appointment)
    }

    /// Cancel an appointment, freeing its slot, then notify both parties.
    pub async fn cancel(
        &self,
        pool: &PgPool,
        appointment_id: Uuid,
    ) -> Result<AppointmentRow, DomainError> {
        let mut tx = pool.begin().await?;

        let current = lock_appointment(&mut tx, appointment_id).await?;
        cancel_guard(current)?;

        let appointment: AppointmentRow = sqlx::query_as(&format!(
            r#"
            UPDATE appointment
            SET status = 'CANCELLED', is_booked = false
            WHERE appointment_id = $1
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(appointment_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(r#"UPDATE appointment_slot SET is_booked = false WHERE slot_id = $1"#)
            .bind(appointment.slot_id)
            .execute(&mut *tx)
            .await?;

        let ctx = slot_context(&mut tx, appointment.slot_id, appointment.patient_id).await?;

        tx.commit().await?;

        info!(appointment_id = %appointment_id, "appointment cancelled");

        let body = cancelled_message(ctx.working_date, ctx.start_time, ctx.end_time);
        for user_id in [ctx.doctor_user_id, ctx.patient_user_id] {
            if let Err(e) = self
                .notifier
                .notify(pool, user_id, "Appointment cancelled", &body)
                .await
            {
                warn!(
                    appointment_id = %appointment_id,
                    user_id = %user_id,
                    error = %e,
                    "cancellation notification failed"
                );
            }
        }

        Ok(appointment)
    }

    /// Confirm a pending appointment, then notify the patient.
    pub async fn confirm(
        &self,
        pool: &PgPool,
        appointment_id: Uuid,
    ) -> Result<AppointmentRow, DomainError> {
        let mut tx = pool.begin().await?;

        let current = lock_appointment(&mut tx, appointment_id).await?;
        confirm_guard(current)?;

        let appointment: AppointmentRow = sqlx::query_as(&format!(
            r#"
            UPDATE appointment
            SET status = 'CONFIRMED'
            WHERE appointment_id = $1
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(appointment_id)
        .fetch_one(&mut *tx)
        .await?;

        let ctx = slot_context(&mut tx, appointment.slot_id, appointment.patient_id).await?;

        tx.commit().await?;

        info!(appointment_id = %appointment_id, "appointment confirmed");

        let body = confirmed_message(ctx.working_date, ctx.start_time, ctx.end_time);
        if let Err(e) = self
            .notifier
            .notify(pool, ctx.patient_user_id, "Appointment confirmed", &body)
            .await
        {
            warn!(
                appointment_id = %appointment_id,
                error = %e,
                "confirmation notification failed"
            );
        }

        Ok(appointment)
    }

    /// Completion hook invoked when a prescription is finalized. The only
    /// writer allowed to jump PENDING/CONFIRMED straight to COMPLETED.
    /// Already-completed appointments are left untouched.
    pub async fn complete_on_prescription(
        &self,
        pool: &PgPool,
        appointment_id: Uuid,
    ) -> Result<AppointmentRow, DomainError> {
        let mut tx = pool.begin().await?;

        let current = lock_appointment(&mut tx, appointment_id).await?;
        if !complete_guard(current)? {
            let appointment: AppointmentRow = sqlx::query_as(&format!(
                r#"SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1"#
            ))
            .bind(appointment_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(appointment);
        }

        let appointment: AppointmentRow = sqlx::query_as(&format!(
            r#"
            UPDATE appointment
            SET status = 'COMPLETED'
            WHERE appointment_id = $1
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        ))
        .bind(appointment_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(appointment_id = %appointment_id, "appointment completed");
        Ok(appointment)
    }
}

async fn lock_appointment(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    appointment_id: Uuid,
) -> Result<AppointmentStatus, DomainError> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"SELECT status FROM appointment WHERE appointment_id = $1 FOR UPDATE"#,
    )
    .bind(appointment_id)
    .fetch_optional(&mut **tx)
    .await?;

    let (status,) = row.ok_or(DomainError::AppointmentNotFound)?;
    AppointmentStatus::parse(&status)
        .ok_or_else(|| DomainError::Database(format!("unknown appointment status {status:?}")))
}

/// Slot timing plus both parties' user ids, read inside the transaction so
/// the notification text matches the committed state.
async fn slot_context(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    slot_id: Uuid,
    patient_id: Uuid,
) -> Result<SlotContextRow, DomainError> {
    let ctx: SlotContextRow = sqlx::query_as(
        r#"
        SELECT
          s.working_date,
          s.start_time,
          s.end_time,
          d.user_id AS doctor_user_id,
          p.user_id AS patient_user_id
        FROM appointment_slot s
        JOIN doctor_schedule ds ON ds.schedule_id = s.schedule_id
        JOIN doctor d ON d.doctor_id = ds.doctor_id
        JOIN patient p ON p.patient_id = $2
        WHERE s.slot_id = $1
        "#,
    )
    .bind(slot_id)
    .bind(patient_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(ctx)
}

/* ============================================================
   Transition guards and notification text (pure)
   ============================================================ */

fn cancel_guard(status: AppointmentStatus) -> Result<(), DomainError> {
    match status {
        AppointmentStatus::Cancelled => Err(DomainError::AlreadyCancelled),
        AppointmentStatus::Completed | AppointmentStatus::Rescheduled => {
            Err(DomainError::AppointmentClosed)
        }
        AppointmentStatus::Pending | AppointmentStatus::Confirmed => Ok(()),
    }
}

fn confirm_guard(status: AppointmentStatus) -> Result<(), DomainError> {
    match status {
        AppointmentStatus::Confirmed => Err(DomainError::AlreadyConfirmed),
        AppointmentStatus::Cancelled
        | AppointmentStatus::Completed
        | AppointmentStatus::Rescheduled => Err(DomainError::AppointmentClosed),
        AppointmentStatus::Pending => Ok(()),
    }
}

/// Ok(true) means the transition should be written; Ok(false) means the
/// appointment is already completed and the call is a no-op.
fn complete_guard(status: AppointmentStatus) -> Result<bool, DomainError> {
    match status {
        AppointmentStatus::Completed => Ok(false),
        AppointmentStatus::Cancelled | AppointmentStatus::Rescheduled => {
            Err(DomainError::AppointmentClosed)
        }
        AppointmentStatus::Pending | AppointmentStatus::Confirmed => Ok(true),
    }
}

fn cancelled_message(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> String {
    format!(
        "The appointment on {date} from {} to {} has been cancelled.",
        start.format("%H:%M"),
        end.format("%H:%M")
    )
}

fn confirmed_message(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> String {
    format!(
        "Your appointment on {date} from {} to {} has been confirmed.",
        start.format("%H:%M"),
        end.format("%H:%M")
    )
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    #[test]
    fn cancel_allowed_from_pending_and_confirmed() {
        assert!(cancel_guard(Pending).is_ok());
        assert!(cancel_guard(Confirmed).is_ok());
    }

    #[test]
    fn second_cancel_reports_already_cancelled() {
        assert!(matches!(
            cancel_guard(Cancelled),
            Err(DomainError::AlreadyCancelled)
        ));
    }

    #[test]
    fn cancel_refused_on_terminal_states() {
        assert!(matches!(
            cancel_guard(Completed),
            Err(DomainError::AppointmentClosed)
        ));
        assert!(matches!(
            cancel_guard(Rescheduled),
            Err(DomainError::AppointmentClosed)
        ));
    }

    #[test]
    fn confirm_only_from_pending() {
        assert!(confirm_guard(Pending).is_ok());
        assert!(matches!(
            confirm_guard(Confirmed),
            Err(DomainError::AlreadyConfirmed)
        ));
        assert!(matches!(
            confirm_guard(Cancelled),
            Err(DomainError::AppointmentClosed)
        ));
        assert!(matches!(
            confirm_guard(Completed),
            Err(DomainError::AppointmentClosed)
        ));
    }

    #[test]
    fn complete_shortcut_skips_confirmed() {
        // the prescription hook may jump PENDING straight to COMPLETED
        assert_eq!(complete_guard(Pending).unwrap(), true);
        assert_eq!(complete_guard(Confirmed).unwrap(), true);
    }

    #[test]
    fn complete_is_idempotent_and_refuses_cancelled() {
        assert_eq!(complete_guard(Completed).unwrap(), false);
        assert!(matches!(
            complete_guard(Cancelled),
            Err(DomainError::AppointmentClosed)
        ));
    }

    #[test]
    fn cancellation_message_names_the_slot_range() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let msg = cancelled_message(
            date,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(9, 20, 0).unwrap(),
        );
        assert!(msg.contains("2025-06-10"));
        assert!(msg.contains("09:00"));
        assert!(msg.contains("09:20"));
        assert!(msg.contains("cancelled"));
    }

    #[test]
    fn confirmation_message_names_the_slot_range() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let msg = confirmed_message(
            date,
            NaiveTime::from_hms_opt(9, 20, 0).unwrap(),
            NaiveTime::from_hms_opt(9, 40, 0).unwrap(),
        );
        assert!(msg.contains("confirmed"));
        assert!(msg.contains("09:20"));
        assert!(msg.contains("09:40"));
    }
}
