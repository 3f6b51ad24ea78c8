// tests/live_engine_test.rs
//
// Runs the booking lifecycle against a real Postgres. Skipped unless
// DATABASE_URL is set (point it at a disposable database; the schema is
// applied via the bundled migrations).

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use sqlx::PgPool;
use uuid::Uuid;

use medibook_server::error::DomainError;
use medibook_server::services::booking::BookingEngine;
use medibook_server::services::notify::PgNotifier;
use medibook_server::services::qr::PgQrIssuer;
use medibook_server::services::{queries, schedule};

async fn test_pool() -> Option<PgPool> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(u) => u,
        Err(_) => {
            eprintln!("skipping live engine tests (DATABASE_URL not set)");
            return None;
        }
    };
    let pool = PgPool::connect(&url).await.expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("apply migrations");
    Some(pool)
}

fn engine() -> BookingEngine {
    BookingEngine::new(Arc::new(PgNotifier), Arc::new(PgQrIssuer))
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

async fn seed_user(pool: &PgPool, role: i16) -> Uuid {
    let username = format!("user-{}", Uuid::new_v4());
    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO app_user (username, display_name, password_hash, role)
        VALUES ($1, 'Test User', 'unusable-hash', $2)
        RETURNING user_id
        "#,
    )
    .bind(&username)
    .bind(role)
    .fetch_one(pool)
    .await
    .unwrap();
    user_id
}

async fn seed_doctor(pool: &PgPool) -> (Uuid, Uuid) {
    let user_id = seed_user(pool, 2).await;
    let (doctor_id,): (Uuid,) =
        sqlx::query_as(r#"INSERT INTO doctor (user_id) VALUES ($1) RETURNING doctor_id"#)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap();
    (user_id, doctor_id)
}

async fn seed_patient(pool: &PgPool) -> (Uuid, Uuid) {
    let user_id = seed_user(pool, 0).await;
    let (patient_id,): (Uuid,) =
        sqlx::query_as(r#"INSERT INTO patient (user_id) VALUES ($1) RETURNING patient_id"#)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap();
    (user_id, patient_id)
}

async fn slot_is_booked(pool: &PgPool, slot_id: Uuid) -> bool {
    let (b,): (bool,) =
        sqlx::query_as(r#"SELECT is_booked FROM appointment_slot WHERE slot_id = $1"#)
            .bind(slot_id)
            .fetch_one(pool)
            .await
            .unwrap();
    b
}

async fn notification_count(pool: &PgPool, user_id: Uuid) -> i64 {
    let (n,): (i64,) =
        sqlx::query_as(r#"SELECT COUNT(*) FROM notification WHERE user_id = $1"#)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap();
    n
}

#[tokio::test]
async fn booking_lifecycle_book_cancel_rebook() {
    let Some(pool) = test_pool().await else { return };
    let engine = engine();

    let (doctor_user, doctor_id) = seed_doctor(&pool).await;
    let (patient_user, _patient_id) = seed_patient(&pool).await;

    // 09:00-10:00 at 20 minutes: exactly three slots
    let (_schedule, slots) = schedule::create_schedule(
        &pool,
        doctor_id,
        &schedule::ScheduleSpec {
            working_date: d(2025, 6, 10),
            start_time: t(9, 0),
            end_time: t(10, 0),
            slot_duration_min: 20,
        },
    )
    .await
    .unwrap();
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[0].start_time, t(9, 0));
    assert_eq!(slots[2].end_time, t(10, 0));

    let booked = engine
        .book(&pool, patient_user, slots[0].slot_id, Some("checkup".into()))
        .await
        .unwrap();
    assert_eq!(booked.status, "PENDING");
    assert!(booked.is_booked);
    assert!(booked.qr_data.is_some(), "QR payload attached on booking");
    assert!(slot_is_booked(&pool, slots[0].slot_id).await);

    // a user without a patient profile cannot book at all
    let err = engine
        .book(&pool, doctor_user, slots[1].slot_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::PatientNotFound));

    // booking the same slot again fails with a conflict
    let (other_user, _) = seed_patient(&pool).await;
    let err = engine
        .book(&pool, other_user, slots[0].slot_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::SlotUnavailable));

    let doctor_before = notification_count(&pool, doctor_user).await;
    let patient_before = notification_count(&pool, patient_user).await;

    let cancelled = engine.cancel(&pool, booked.appointment_id).await.unwrap();
    assert_eq!(cancelled.status, "CANCELLED");
    assert!(!cancelled.is_booked);
    assert!(!slot_is_booked(&pool, slots[0].slot_id).await);

    // one notification each for doctor and patient
    assert_eq!(notification_count(&pool, doctor_user).await, doctor_before + 1);
    assert_eq!(notification_count(&pool, patient_user).await, patient_before + 1);

    // second cancel reports the state instead of silently succeeding
    let err = engine.cancel(&pool, booked.appointment_id).await.unwrap_err();
    assert!(matches!(err, DomainError::AlreadyCancelled));
    assert!(!slot_is_booked(&pool, slots[0].slot_id).await);

    // the freed slot is bookable again, as an independent appointment
    let rebooked = engine
        .book(&pool, other_user, slots[0].slot_id, None)
        .await
        .unwrap();
    assert_ne!(rebooked.appointment_id, booked.appointment_id);
    assert_eq!(rebooked.status, "PENDING");
    assert!(slot_is_booked(&pool, slots[0].slot_id).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookers_single_winner() {
    let Some(pool) = test_pool().await else { return };

    let (_, doctor_id) = seed_doctor(&pool).await;
    let (_schedule, slots) = schedule::create_schedule(
        &pool,
        doctor_id,
        &schedule::ScheduleSpec {
            working_date: d(2025, 7, 1),
            start_time: t(9, 0),
            end_time: t(9, 30),
            slot_duration_min: 30,
        },
    )
    .await
    .unwrap();
    let slot_id = slots[0].slot_id;

    let mut patients = Vec::new();
    for _ in 0..8 {
        patients.push(seed_patient(&pool).await.0);
    }

    let mut handles = Vec::new();
    for patient_user in patients {
        let pool = pool.clone();
        let engine = engine();
        handles.push(tokio::spawn(async move {
            engine.book(&pool, patient_user, slot_id, None).await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(DomainError::SlotUnavailable) => conflicts += 1,
            Err(e) => panic!("unexpected booking error: {e}"),
        }
    }

    assert_eq!(successes, 1, "exactly one booker wins the slot");
    assert_eq!(conflicts, 7);
    assert!(slot_is_booked(&pool, slot_id).await);
}

#[tokio::test]
async fn confirm_transitions_and_guards() {
    let Some(pool) = test_pool().await else { return };
    let engine = engine();

    let (_, doctor_id) = seed_doctor(&pool).await;
    let (patient_user, _) = seed_patient(&pool).await;
    let (_s, slots) = schedule::create_schedule(
        &pool,
        doctor_id,
        &schedule::ScheduleSpec {
            working_date: d(2025, 7, 2),
            start_time: t(8, 0),
            end_time: t(9, 0),
            slot_duration_min: 30,
        },
    )
    .await
    .unwrap();

    let booked = engine
        .book(&pool, patient_user, slots[0].slot_id, None)
        .await
        .unwrap();

    let before = notification_count(&pool, patient_user).await;
    let confirmed = engine.confirm(&pool, booked.appointment_id).await.unwrap();
    assert_eq!(confirmed.status, "CONFIRMED");
    assert_eq!(notification_count(&pool, patient_user).await, before + 1);

    let err = engine.confirm(&pool, booked.appointment_id).await.unwrap_err();
    assert!(matches!(err, DomainError::AlreadyConfirmed));

    // a cancelled appointment cannot be confirmed afterwards
    let second = engine
        .book(&pool, patient_user, slots[1].slot_id, None)
        .await
        .unwrap();
    engine.cancel(&pool, second.appointment_id).await.unwrap();
    let err = engine.confirm(&pool, second.appointment_id).await.unwrap_err();
    assert!(matches!(err, DomainError::AppointmentClosed));

    let err = engine.confirm(&pool, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, DomainError::AppointmentNotFound));
}

#[tokio::test]
async fn prescription_completion_shortcut() {
    let Some(pool) = test_pool().await else { return };
    let engine = engine();

    let (_, doctor_id) = seed_doctor(&pool).await;
    let (patient_user, _) = seed_patient(&pool).await;
    let (_s, slots) = schedule::create_schedule(
        &pool,
        doctor_id,
        &schedule::ScheduleSpec {
            working_date: d(2025, 7, 3),
            start_time: t(10, 0),
            end_time: t(11, 0),
            slot_duration_min: 30,
        },
    )
    .await
    .unwrap();

    // PENDING jumps straight to COMPLETED when the prescription lands
    let booked = engine
        .book(&pool, patient_user, slots[0].slot_id, None)
        .await
        .unwrap();
    let completed = engine
        .complete_on_prescription(&pool, booked.appointment_id)
        .await
        .unwrap();
    assert_eq!(completed.status, "COMPLETED");

    // idempotent: a second finalization leaves it completed
    let again = engine
        .complete_on_prescription(&pool, booked.appointment_id)
        .await
        .unwrap();
    assert_eq!(again.status, "COMPLETED");

    // the slot stays consumed; only cancellation frees it
    assert!(slot_is_booked(&pool, slots[0].slot_id).await);
    let err = engine.cancel(&pool, booked.appointment_id).await.unwrap_err();
    assert!(matches!(err, DomainError::AppointmentClosed));
}

#[tokio::test]
async fn visit_counter_includes_cancellations() {
    let Some(pool) = test_pool().await else { return };
    let engine = engine();

    let (_, doctor_id) = seed_doctor(&pool).await;
    let (patient_user, patient_id) = seed_patient(&pool).await;
    let (_s, slots) = schedule::create_schedule(
        &pool,
        doctor_id,
        &schedule::ScheduleSpec {
            working_date: d(2025, 7, 4),
            start_time: t(9, 0),
            end_time: t(11, 0),
            slot_duration_min: 30,
        },
    )
    .await
    .unwrap();

    // three booked-then-cancelled visits plus one completed visit
    for slot in &slots[0..3] {
        let a = engine.book(&pool, patient_user, slot.slot_id, None).await.unwrap();
        engine.cancel(&pool, a.appointment_id).await.unwrap();
    }
    let a = engine.book(&pool, patient_user, slots[3].slot_id, None).await.unwrap();
    engine.complete_on_prescription(&pool, a.appointment_id).await.unwrap();

    let visits = queries::count_visits(&pool, patient_id, doctor_id).await.unwrap();
    assert_eq!(visits, 4, "history includes cancelled visits");
}

#[tokio::test]
async fn schedule_update_locked_by_booking() {
    let Some(pool) = test_pool().await else { return };
    let engine = engine();

    let (_, doctor_id) = seed_doctor(&pool).await;
    let (patient_user, _) = seed_patient(&pool).await;
    let (created, slots) = schedule::create_schedule(
        &pool,
        doctor_id,
        &schedule::ScheduleSpec {
            working_date: d(2025, 7, 5),
            start_time: t(9, 0),
            end_time: t(10, 0),
            slot_duration_min: 20,
        },
    )
    .await
    .unwrap();
    assert_eq!(slots.len(), 3);

    engine
        .book(&pool, patient_user, slots[1].slot_id, None)
        .await
        .unwrap();

    let err = schedule::update_schedule(
        &pool,
        created.schedule_id,
        Some(doctor_id),
        &schedule::ScheduleSpec {
            working_date: d(2025, 7, 5),
            start_time: t(9, 0),
            end_time: t(12, 0),
            slot_duration_min: 30,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DomainError::ScheduleLocked));

    // all three slots untouched
    let remaining: Vec<(Uuid,)> = sqlx::query_as(
        r#"SELECT slot_id FROM appointment_slot WHERE schedule_id = $1 ORDER BY start_time"#,
    )
    .bind(created.schedule_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    let remaining: Vec<Uuid> = remaining.into_iter().map(|(id,)| id).collect();
    let original: Vec<Uuid> = slots.iter().map(|s| s.slot_id).collect();
    assert_eq!(remaining, original);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schedule_update_waits_for_inflight_booking() {
    let Some(pool) = test_pool().await else { return };

    let (_, doctor_id) = seed_doctor(&pool).await;
    let (_, patient_id) = seed_patient(&pool).await;
    let (created, slots) = schedule::create_schedule(
        &pool,
        doctor_id,
        &schedule::ScheduleSpec {
            working_date: d(2025, 7, 7),
            start_time: t(9, 0),
            end_time: t(10, 0),
            slot_duration_min: 20,
        },
    )
    .await
    .unwrap();
    let slot_id = slots[1].slot_id;

    // a booking transaction holds the slot lock, uncommitted
    let mut booker = pool.begin().await.unwrap();
    sqlx::query(r#"SELECT slot_id FROM appointment_slot WHERE slot_id = $1 FOR UPDATE"#)
        .bind(slot_id)
        .execute(&mut *booker)
        .await
        .unwrap();
    sqlx::query(
        r#"INSERT INTO appointment (slot_id, patient_id, status, is_booked) VALUES ($1, $2, 'PENDING', true)"#,
    )
    .bind(slot_id)
    .bind(patient_id)
    .execute(&mut *booker)
    .await
    .unwrap();
    sqlx::query(r#"UPDATE appointment_slot SET is_booked = true WHERE slot_id = $1"#)
        .bind(slot_id)
        .execute(&mut *booker)
        .await
        .unwrap();

    // the update must queue behind the booker's slot lock, not slip past it
    let update = tokio::spawn({
        let pool = pool.clone();
        let schedule_id = created.schedule_id;
        async move {
            schedule::update_schedule(
                &pool,
                schedule_id,
                Some(doctor_id),
                &schedule::ScheduleSpec {
                    working_date: d(2025, 7, 7),
                    start_time: t(9, 0),
                    end_time: t(11, 0),
                    slot_duration_min: 30,
                },
            )
            .await
        }
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    booker.commit().await.unwrap();

    let err = update.await.unwrap().unwrap_err();
    assert!(matches!(err, DomainError::ScheduleLocked));

    // the original slots survive
    let (remaining,): (i64,) =
        sqlx::query_as(r#"SELECT COUNT(*) FROM appointment_slot WHERE schedule_id = $1"#)
            .bind(created.schedule_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 3);
    assert!(slot_is_booked(&pool, slot_id).await);
}

#[tokio::test]
async fn schedule_update_regenerates_when_unbooked() {
    let Some(pool) = test_pool().await else { return };

    let (_, doctor_id) = seed_doctor(&pool).await;
    let (created, slots) = schedule::create_schedule(
        &pool,
        doctor_id,
        &schedule::ScheduleSpec {
            working_date: d(2025, 7, 6),
            start_time: t(9, 0),
            end_time: t(10, 0),
            slot_duration_min: 20,
        },
    )
    .await
    .unwrap();
    assert_eq!(slots.len(), 3);

    let (_updated, new_slots) = schedule::update_schedule(
        &pool,
        created.schedule_id,
        Some(doctor_id),
        &schedule::ScheduleSpec {
            working_date: d(2025, 7, 6),
            start_time: t(9, 0),
            end_time: t(10, 30),
            slot_duration_min: 30,
        },
    )
    .await
    .unwrap();

    assert_eq!(new_slots.len(), 3);
    assert!(new_slots.iter().all(|s| !s.is_booked));
    // old slots are gone
    let old_ids: Vec<Uuid> = slots.iter().map(|s| s.slot_id).collect();
    assert!(new_slots.iter().all(|s| !old_ids.contains(&s.slot_id)));
}

#[tokio::test]
async fn next_appointment_ordering_and_filtering() {
    let Some(pool) = test_pool().await else { return };
    let engine = engine();

    let (_, doctor_id) = seed_doctor(&pool).await;
    let (patient_user, _) = seed_patient(&pool).await;

    // far-future date so "strictly after now" holds for every slot
    let date = d(2030, 1, 15);
    let (_s, slots) = schedule::create_schedule(
        &pool,
        doctor_id,
        &schedule::ScheduleSpec {
            working_date: date,
            start_time: t(9, 0),
            end_time: t(10, 0),
            slot_duration_min: 20,
        },
    )
    .await
    .unwrap();

    // book the latest and the earliest; cancel a middle booking
    engine.book(&pool, patient_user, slots[2].slot_id, None).await.unwrap();
    engine.book(&pool, patient_user, slots[0].slot_id, None).await.unwrap();
    let middle = engine.book(&pool, patient_user, slots[1].slot_id, None).await.unwrap();
    engine.cancel(&pool, middle.appointment_id).await.unwrap();

    let next = queries::next_appointment(&pool, doctor_id, d(2030, 1, 15), t(8, 0))
        .await
        .unwrap()
        .expect("an upcoming appointment exists");
    assert_eq!(next.start_time, t(9, 0), "earliest active slot wins");

    // past the first slot's start, the next moves to the last active slot
    let next = queries::next_appointment(&pool, doctor_id, date, t(9, 10))
        .await
        .unwrap()
        .expect("an upcoming appointment exists");
    assert_eq!(next.start_time, t(9, 40), "cancelled middle slot is skipped");

    let day = queries::appointments_on_day(&pool, doctor_id, date).await.unwrap();
    assert_eq!(day.len(), 2, "cancelled appointments are excluded");
    assert!(day[0].start_time < day[1].start_time);

    let available = queries::available_slots(&pool, doctor_id, date).await.unwrap();
    assert_eq!(available.len(), 1, "only the freed middle slot is open");
    assert_eq!(available[0].start_time, t(9, 20));
}
