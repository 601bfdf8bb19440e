//! Scheduling invariants that only a real Postgres enforces: the
//! booking range-exclusion constraint (testable property 2) and hold
//! expiry (scenario S5).

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nevermiss::scheduling::hold::{book_appointment, cancel_appointment, create_hold, expire_holds, BookOutcome, CancelOutcome, HoldOutcome};

async fn seed_resource(pool: &PgPool, tenant_id: Uuid, active: bool) -> Uuid {
    sqlx::query_scalar(
        "insert into resources (tenant_id, name, active) values ($1, $2, $3) returning id")
    .bind(tenant_id)
    .bind("Chair 1")
    .bind(active)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[sqlx::test]
async fn concurrent_booking_of_two_holds_on_the_same_slot_lets_only_one_through(pool: PgPool) {
    // S4: two valid holds created at the exact same timeslot (holds
    // don't exclude each other at the database level, only
    // appointments do), booked concurrently. Exactly one must succeed.
    let tenant_id = Uuid::new_v4();
    let resource_id = seed_resource(&pool, tenant_id, true).await;

    let start = Utc::now() + Duration::hours(1);
    let end = start + Duration::minutes(30);
    let expires_at = Utc::now() + Duration::minutes(15);

    let insert_hold = |phone_suffix: &'static str| {
        let pool = pool.clone();
        async move {
            sqlx::query_scalar::<_, Uuid>(
                "insert into holds (tenant_id, resource_id, timeslot, expires_at, created_by) values ($1, $2, tstzrange($3, $4), $5, $6) returning id")
            .bind(tenant_id)
            .bind(resource_id)
            .bind(start)
            .bind(end)
            .bind(expires_at)
            .bind(phone_suffix)
            .fetch_one(&pool)
            .await
            .unwrap()
        }
    };

    let hold_a = insert_hold("a").await;
    let hold_b = insert_hold("b").await;

    let (result_a, result_b) = tokio::join!(
        book_appointment(&pool, tenant_id, hold_a, Uuid::new_v4(), "+13105551212", 4500, "usd"),
        book_appointment(&pool, tenant_id, hold_b, Uuid::new_v4(), "+13105551213", 4500, "usd"),
    );

    let outcomes = [result_a.unwrap(), result_b.unwrap()];
    let ok_count = outcomes.iter().filter(|o| matches!(o, BookOutcome::Ok { .. })).count();
    let conflict_count = outcomes.iter().filter(|o| matches!(o, BookOutcome::Conflict)).count();
    assert_eq!(ok_count, 1, "exactly one booking attempt should succeed");
    assert_eq!(conflict_count, 1, "the other should see a conflict");

    let appointment_count: i64 = sqlx::query_scalar(
        "select count(*) from appointments where resource_id = $1 and cancelled_at is null")
    .bind(resource_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(appointment_count, 1);

    let booked_events: i64 = sqlx::query_scalar(
        "select count(*) from outbox_events where event_name = 'scheduling.AppointmentBooked' and tenant_id = $1")
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(booked_events, 1);
}

#[sqlx::test]
async fn appointment_exclusion_constraint_rejects_overlap(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let resource_id = seed_resource(&pool, tenant_id, true).await;
    let service_item_id = Uuid::new_v4();

    let start = Utc::now() + Duration::hours(2);
    let end = start + Duration::minutes(30);

    sqlx::query(
        "insert into appointments (tenant_id, resource_id, timeslot, service_item_id, customer_phone) values ($1, $2, tstzrange($3, $4), $5, $6)")
    .bind(tenant_id)
    .bind(resource_id)
    .bind(start)
    .bind(end)
    .bind(service_item_id)
    .bind("+13105551212")
    .execute(&pool)
    .await
    .unwrap();

    let hold_id: Uuid = sqlx::query_scalar(
        "insert into holds (tenant_id, resource_id, timeslot, expires_at) values ($1, $2, tstzrange($3, $4), $5) returning id")
    .bind(tenant_id)
    .bind(resource_id)
    .bind(start + Duration::minutes(10))
    .bind(end + Duration::minutes(10))
    .bind(Utc::now() + Duration::minutes(15))
    .fetch_one(&pool)
    .await
    .unwrap();

    let outcome = book_appointment(&pool, tenant_id, hold_id, service_item_id, "+13105551213", 4500, "usd")
        .await
        .unwrap();
    assert!(matches!(outcome, BookOutcome::Conflict));

    let appointment_count: i64 = sqlx::query_scalar(
        "select count(*) from appointments where resource_id = $1 and cancelled_at is null")
    .bind(resource_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(appointment_count, 1);
}

#[sqlx::test]
async fn booking_an_expired_hold_returns_hold_expired(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let resource_id = seed_resource(&pool, tenant_id, true).await;

    let start = Utc::now() + Duration::hours(3);
    let end = start + Duration::minutes(30);

    let hold_id: Uuid = sqlx::query_scalar(
        "insert into holds (tenant_id, resource_id, timeslot, expires_at) values ($1, $2, tstzrange($3, $4), $5) returning id")
    .bind(tenant_id)
    .bind(resource_id)
    .bind(start)
    .bind(end)
    .bind(Utc::now() - Duration::minutes(1))
    .fetch_one(&pool)
    .await
    .unwrap();

    let outcome = book_appointment(&pool, tenant_id, hold_id, Uuid::new_v4(), "+13105551212", 4500, "usd")
        .await
        .unwrap();
    assert!(matches!(outcome, BookOutcome::HoldExpired));
}

#[sqlx::test]
async fn hold_gc_deletes_expired_holds_and_emits_release(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let resource_id = seed_resource(&pool, tenant_id, true).await;

    let hold_id: Uuid = sqlx::query_scalar(
        "insert into holds (tenant_id, resource_id, timeslot, expires_at) values ($1, $2, tstzrange(now(), now() + interval '30 minutes'), $3) returning id")
    .bind(tenant_id)
    .bind(resource_id)
    .bind(Utc::now() - Duration::minutes(1))
    .fetch_one(&pool)
    .await
    .unwrap();

    let released = expire_holds(&pool).await.unwrap();
    assert_eq!(released, 1);

    let remaining: i64 = sqlx::query_scalar("select count(*) from holds where id = $1")
        .bind(hold_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    let release_events: i64 = sqlx::query_scalar(
        "select count(*) from outbox_events where event_name = 'scheduling.AppointmentReleased' and tenant_id = $1")
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(release_events, 1);
}

#[sqlx::test]
async fn create_hold_on_inactive_resource_is_rejected(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let resource_id = seed_resource(&pool, tenant_id, false).await;

    let start = Utc::now() + Duration::hours(1);
    let outcome = create_hold(&pool, tenant_id, resource_id, start, start + Duration::minutes(30), None, Duration::minutes(15))
        .await
        .unwrap();
    assert!(matches!(outcome, HoldOutcome::InactiveResource));
}

#[sqlx::test]
async fn cancelling_an_appointment_frees_the_slot_for_rebooking(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let resource_id = seed_resource(&pool, tenant_id, true).await;
    let start = Utc::now() + Duration::hours(4);
    let end = start + Duration::minutes(30);

    let hold_id: Uuid = sqlx::query_scalar(
        "insert into holds (tenant_id, resource_id, timeslot, expires_at) values ($1, $2, tstzrange($3, $4), $5) returning id")
    .bind(tenant_id)
    .bind(resource_id)
    .bind(start)
    .bind(end)
    .bind(Utc::now() + Duration::minutes(15))
    .fetch_one(&pool)
    .await
    .unwrap();

    let appointment_id = match book_appointment(&pool, tenant_id, hold_id, Uuid::new_v4(), "+13105551212", 4500, "usd").await.unwrap() {
        BookOutcome::Ok { appointment_id } => appointment_id,
        other => panic!("expected Ok, got {other:?}"),
    };

    assert!(matches!(cancel_appointment(&pool, tenant_id, appointment_id).await.unwrap(), CancelOutcome::Cancelled));

    let new_hold_id: Uuid = sqlx::query_scalar(
        "insert into holds (tenant_id, resource_id, timeslot, expires_at) values ($1, $2, tstzrange($3, $4), $5) returning id")
    .bind(tenant_id)
    .bind(resource_id)
    .bind(start)
    .bind(end)
    .bind(Utc::now() + Duration::minutes(15))
    .fetch_one(&pool)
    .await
    .unwrap();

    let rebooked = book_appointment(&pool, tenant_id, new_hold_id, Uuid::new_v4(), "+13105551214", 4500, "usd")
        .await
        .unwrap();
    assert!(matches!(rebooked, BookOutcome::Ok { .. }));
}
