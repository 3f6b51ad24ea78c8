use chrono::{NaiveDate, NaiveTime, Timelike};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::{ScheduleRow, SlotRow};

/// A doctor's working interval for one date, before slot expansion.
#[derive(Debug, Clone)]
pub struct ScheduleSpec {
    pub working_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_min: i32,
}

/// Expand a working interval into non-overlapping slots of
/// `duration_min` minutes covering `[start, end)`. A trailing remainder
/// shorter than the duration is dropped, never padded.
pub fn expand_slots(
    start: NaiveTime,
    end: NaiveTime,
    duration_min: i32,
) -> Result<Vec<(NaiveTime, NaiveTime)>, DomainError> {
    if duration_min <= 0 {
        return Err(DomainError::Validation(
            "slot_duration_min must be > 0".into(),
        ));
    }
    if start >= end {
        return Err(DomainError::Validation(
            "start_time must be before end_time".into(),
        ));
    }

    let start_s = start.num_seconds_from_midnight() as i64;
    let end_s = end.num_seconds_from_midnight() as i64;
    let dur_s = duration_min as i64 * 60;

    let mut slots = Vec::with_capacity(((end_s - start_s) / dur_s) as usize);
    let mut cursor = start_s;
    while cursor + dur_s <= end_s {
        slots.push((sec_to_time(cursor), sec_to_time(cursor + dur_s)));
        cursor += dur_s;
    }
    Ok(slots)
}

fn sec_to_time(s: i64) -> NaiveTime {
    // s stays within [0, 86400) because it is bounded by a NaiveTime input
    NaiveTime::from_num_seconds_from_midnight_opt(s as u32, 0).unwrap()
}

/// Insert a schedule and bulk-create its slots in one transaction.
pub async fn create_schedule(
    pool: &PgPool,
    doctor_id: Uuid,
    spec: &ScheduleSpec,
) -> Result<(ScheduleRow, Vec<SlotRow>), DomainError> {
    let windows = expand_slots(spec.start_time, spec.end_time, spec.slot_duration_min)?;

    let mut tx = pool.begin().await?;

    let schedule: ScheduleRow = sqlx::query_as(
        r#"
        INSERT INTO doctor_schedule (doctor_id, working_date, start_time, end_time, slot_duration_min)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING schedule_id, doctor_id, working_date, start_time, end_time, slot_duration_min
        "#,
    )
    .bind(doctor_id)
    .bind(spec.working_date)
    .bind(spec.start_time)
    .bind(spec.end_time)
    .bind(spec.slot_duration_min)
    .fetch_one(&mut *tx)
    .await?;

    let slots = insert_slots(&mut tx, schedule.schedule_id, spec.working_date, &windows).await?;

    tx.commit().await?;

    info!(
        schedule_id = %schedule.schedule_id,
        slots = slots.len(),
        "schedule created"
    );
    Ok((schedule, slots))
}

/// Replace an unbooked schedule's definition and regenerate its slots.
///
/// The schedule row and every slot row are locked before the booked check so
/// a concurrent booking either commits first (making this fail with
/// `ScheduleLocked`) or waits and then finds the old slots gone.
pub async fn update_schedule(
    pool: &PgPool,
    schedule_id: Uuid,
    requester_doctor: Option<Uuid>,
    spec: &ScheduleSpec,
) -> Result<(ScheduleRow, Vec<SlotRow>), DomainError> {
    let windows = expand_slots(spec.start_time, spec.end_time, spec.slot_duration_min)?;

    let mut tx = pool.begin().await?;

    let current = lock_schedule(&mut tx, schedule_id, requester_doctor).await?;
    ensure_unbooked(&mut tx, schedule_id).await?;

    let schedule: ScheduleRow = sqlx::query_as(
        r#"
        UPDATE doctor_schedule
        SET working_date = $2, start_time = $3, end_time = $4, slot_duration_min = $5
        WHERE schedule_id = $1
        RETURNING schedule_id, doctor_id, working_date, start_time, end_time, slot_duration_min
        "#,
    )
    .bind(schedule_id)
    .bind(spec.working_date)
    .bind(spec.start_time)
    .bind(spec.end_time)
    .bind(spec.slot_duration_min)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(r#"DELETE FROM appointment_slot WHERE schedule_id = $1"#)
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;

    let slots = insert_slots(&mut tx, schedule_id, spec.working_date, &windows).await?;

    tx.commit().await?;

    info!(
        schedule_id = %schedule_id,
        doctor_id = %current.doctor_id,
        slots = slots.len(),
        "schedule regenerated"
    );
    Ok((schedule, slots))
}

/// Delete an unbooked schedule and its slots.
pub async fn delete_schedule(
    pool: &PgPool,
    schedule_id: Uuid,
    requester_doctor: Option<Uuid>,
) -> Result<(), DomainError> {
    let mut tx = pool.begin().await?;

    lock_schedule(&mut tx, schedule_id, requester_doctor).await?;
    ensure_unbooked(&mut tx, schedule_id).await?;

    sqlx::query(r#"DELETE FROM appointment_slot WHERE schedule_id = $1"#)
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(r#"DELETE FROM doctor_schedule WHERE schedule_id = $1"#)
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(schedule_id = %schedule_id, "schedule deleted");
    Ok(())
}

async fn lock_schedule(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    schedule_id: Uuid,
    requester_doctor: Option<Uuid>,
) -> Result<ScheduleRow, DomainError> {
    let schedule: Option<ScheduleRow> = sqlx::query_as(
        r#"
        SELECT schedule_id, doctor_id, working_date, start_time, end_time, slot_duration_min
        FROM doctor_schedule
        WHERE schedule_id = $1
        FOR UPDATE
        "#,
    )
    .bind(schedule_id)
    .fetch_optional(&mut **tx)
    .await?;

    let schedule = schedule.ok_or(DomainError::ScheduleNotFound)?;

    if let Some(doctor_id) = requester_doctor {
        if schedule.doctor_id != doctor_id {
            return Err(DomainError::Forbidden(
                "Schedule belongs to another doctor".into(),
            ));
        }
    }
    Ok(schedule)
}

/// Lock all slot rows of the schedule, then fail if any is booked. The lock
/// is taken first: a concurrent booking holding a slot lock makes this wait
/// for its commit, and the check that follows reads the committed flag.
async fn ensure_unbooked(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    schedule_id: Uuid,
) -> Result<(), DomainError> {
    sqlx::query(r#"SELECT slot_id FROM appointment_slot WHERE schedule_id = $1 FOR UPDATE"#)
        .bind(schedule_id)
        .execute(&mut **tx)
        .await?;

    let booked: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT slot_id FROM appointment_slot
        WHERE schedule_id = $1 AND is_booked = true
        LIMIT 1
        "#,
    )
    .bind(schedule_id)
    .fetch_optional(&mut **tx)
    .await?;

    if booked.is_some() {
        return Err(DomainError::ScheduleLocked);
    }
    Ok(())
}

async fn insert_slots(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    schedule_id: Uuid,
    working_date: NaiveDate,
    windows: &[(NaiveTime, NaiveTime)],
) -> Result<Vec<SlotRow>, DomainError> {
    let mut slots = Vec::with_capacity(windows.len());
    for (slot_start, slot_end) in windows {
        let slot: SlotRow = sqlx::query_as(
            r#"
            INSERT INTO appointment_slot (schedule_id, working_date, start_time, end_time, is_booked)
            VALUES ($1, $2, $3, $4, false)
            RETURNING slot_id, schedule_id, working_date, start_time, end_time, is_booked
            "#,
        )
        .bind(schedule_id)
        .bind(working_date)
        .bind(slot_start)
        .bind(slot_end)
        .fetch_one(&mut **tx)
        .await?;
        slots.push(slot);
    }
    Ok(slots)
}
