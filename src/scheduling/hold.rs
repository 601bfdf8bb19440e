//! Hold creation, booking, and hold expiry.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{NevermissError, PreconditionKind};
use crate::outbox::{self, NewEvent};

/// Result of [`create_hold`]: fails with `Conflict` if the slot is
/// taken, `InactiveResource` if the resource is disabled.
#[derive(Debug)]
pub enum HoldOutcome {
    Created { hold_id: Uuid, expires_at: DateTime<Utc> },
    Conflict,
    InactiveResource,
}

/// Verify the slot doesn't overlap any busy range, insert a `Hold` with
/// `expires_at = now + ttl`, emit `AppointmentHeld`.
pub async fn create_hold(pool: &PgPool, tenant_id: Uuid, resource_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>, created_by: Option<&str>, ttl: chrono::Duration) -> Result<HoldOutcome, NevermissError> {
    let mut tx = pool.begin().await?;

    let active: Option<bool> =
    sqlx::query_scalar("select active from resources where id = $1 and tenant_id = $2")
    .bind(resource_id)
    .bind(tenant_id)
    .fetch_optional(&mut *tx)
    .await?;

    match active {
        None | Some(false) => {
            tx.rollback().await?;
            return Ok(HoldOutcome::InactiveResource);
        }
        Some(true) => {}
    }

    let overlap_count: i64 = sqlx::query_scalar(
        r#"
        select count(*) from (
            select 1 from appointments
            where tenant_id = $1 and resource_id = $2 and cancelled_at is null
            and timeslot && tstzrange($3, $4)
            union all
            select 1 from holds
            where tenant_id = $1 and resource_id = $2 and expires_at > now()
            and timeslot && tstzrange($3, $4)
        ) busy
        "#)
    .bind(tenant_id)
    .bind(resource_id)
    .bind(start)
    .bind(end)
    .fetch_one(&mut *tx)
    .await?;

    if overlap_count > 0 {
        tx.rollback().await?;
        return Ok(HoldOutcome::Conflict);
    }

    let expires_at = Utc::now() + ttl;

    let hold_id: Uuid = sqlx::query_scalar(
        r#"
        insert into holds (tenant_id, resource_id, timeslot, expires_at, created_by)
        values ($1, $2, tstzrange($3, $4), $5, $6)
        returning id
        "#)
    .bind(tenant_id)
    .bind(resource_id)
    .bind(start)
    .bind(end)
    .bind(expires_at)
    .bind(created_by)
    .fetch_one(&mut *tx)
    .await?;

    outbox::append(
        &mut *tx,
        NewEvent {
            tenant_id,
            event_name: "scheduling.AppointmentHeld",
            schema_version: "1.0.0",
            payload: json!({ "hold_id": hold_id, "resource_id": resource_id, "start": start, "end": end, "expires_at": expires_at, }),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
        })
    .await?;

    tx.commit().await?;
    Ok(HoldOutcome::Created { hold_id, expires_at })
}

/// Result of [`book_appointment`].
#[derive(Debug)]
pub enum BookOutcome {
    Ok { appointment_id: Uuid },
    HoldExpired,
    HoldMissing,
    Conflict,
}

/// Atomically convert a hold into an appointment: select the hold with
/// an exclusive lock, verifying it is unexpired and belongs to the
/// calling tenant; insert the appointment (the range-exclusion
/// constraint guarantees no overlap); delete the hold; emit
/// `AppointmentBooked` with a price snapshot; commit.
pub async fn book_appointment(pool: &PgPool, tenant_id: Uuid, hold_id: Uuid, service_item_id: Uuid, customer_phone: &str, price_cents: i64, currency: &str) -> Result<BookOutcome, NevermissError> {
    let mut tx = pool.begin().await?;

    let hold: Option<(Uuid, DateTime<Utc>, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        select resource_id, lower(timeslot), upper(timeslot), expires_at
        from holds
        where id = $1 and tenant_id = $2
        for update
        "#)
    .bind(hold_id)
    .bind(tenant_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((resource_id, start, end, expires_at)) = hold else {
        tx.rollback().await?;
        return Ok(BookOutcome::HoldMissing);
    };

    if expires_at <= Utc::now() {
        tx.rollback().await?;
        return Ok(BookOutcome::HoldExpired);
    }

    let inserted = sqlx::query_scalar::<_, Uuid>(
        r#"
        insert into appointments
        (tenant_id, resource_id, timeslot, service_item_id, customer_phone)
        values ($1, $2, tstzrange($3, $4), $5, $6)
        returning id
        "#)
    .bind(tenant_id)
    .bind(resource_id)
    .bind(start)
    .bind(end)
    .bind(service_item_id)
    .bind(customer_phone)
    .fetch_one(&mut *tx)
    .await;

    let appointment_id: Uuid = match inserted {
        Ok(id) => id,
        Err(e) => {
            if is_overlap_violation(&e) {
                tx.rollback().await?;
                return Ok(BookOutcome::Conflict);
            }
            return Err(NevermissError::Database(e));
        }
    };

    sqlx::query("delete from holds where id = $1")
    .bind(hold_id)
    .execute(&mut *tx)
    .await?;

    outbox::append(
        &mut *tx,
        NewEvent {
            tenant_id,
            event_name: "scheduling.AppointmentBooked",
            schema_version: "1.0.0",
            payload: json!({ "appointment_id": appointment_id, "resource_id": resource_id, "service_item_id": service_item_id, "customer_phone": customer_phone, "start": start, "end": end, "price_cents": price_cents, "currency": currency, "booked_at": Utc::now(), }),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
        })
    .await?;

    tx.commit().await?;
    Ok(BookOutcome::Ok { appointment_id })
}

/// Postgres reports both unique and exclusion-constraint violations as
/// SQLSTATE class 23; the appointments exclusion constraint specifically
/// uses `23P01`.
fn is_overlap_violation(e: &sqlx::Error) -> bool {
    matches!(e.as_database_error().and_then(|d| d.code), Some(code) if code == "23P01")
}

/// Delete expired holds, emitting `AppointmentReleased` for each.
pub async fn expire_holds(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let expired: Vec<(Uuid, Uuid)> = sqlx::query_as("select id, tenant_id from holds where expires_at <= now()")
    .fetch_all(pool)
    .await?;

    for (hold_id, tenant_id) in &expired {
        let mut tx = pool.begin().await?;
        sqlx::query("delete from holds where id = $1")
        .bind(hold_id)
        .execute(&mut *tx)
        .await?;
        outbox::append(
            &mut *tx,
            NewEvent {
                tenant_id: *tenant_id,
                event_name: "scheduling.AppointmentReleased",
                schema_version: "1.0.0",
                payload: json!({ "hold_id": hold_id, "released_at": Utc::now() }),
                correlation_id: Uuid::new_v4(),
                causation_id: None,
            })
        .await?;
        tx.commit().await?;
    }

    Ok(u64::try_from(expired.len()).unwrap_or(u64::MAX))
}

/// Outcome of [`cancel_appointment`].
#[derive(Debug)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

/// Mark an appointment cancelled, freeing its resource/timeslot for
/// rebooking (the exclusion constraint only applies `where cancelled_at
/// is null`), and emit `AppointmentCancelled` for the revenue
/// projector. Revenue stays attributed as booked; cancellations do not
/// reverse it.
pub async fn cancel_appointment(pool: &PgPool, tenant_id: Uuid, appointment_id: Uuid) -> Result<CancelOutcome, NevermissError> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(r#" update appointments set cancelled_at = now() where id = $1 and tenant_id = $2 and cancelled_at is null "#)
    .bind(appointment_id)
    .bind(tenant_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(CancelOutcome::NotFound);
    }

    outbox::append(
        &mut *tx,
        NewEvent {
            tenant_id,
            event_name: "scheduling.AppointmentCancelled",
            schema_version: "1.0.0",
            payload: json!({ "appointment_id": appointment_id, "cancelled_at": Utc::now() }),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
        })
    .await?;

    tx.commit().await?;
    Ok(CancelOutcome::Cancelled)
}

impl PreconditionKind {
    /// Map a [`BookOutcome`] into the precondition this component would
    /// surface, for callers that want a single error type.
    pub fn from_book_outcome(outcome: &BookOutcome) -> Option<Self> {
        match outcome {
            BookOutcome::HoldExpired => Some(PreconditionKind::HoldExpired),
            BookOutcome::HoldMissing => Some(PreconditionKind::HoldMissing),
            BookOutcome::Conflict => Some(PreconditionKind::BookingConflict),
            BookOutcome::Ok {.. } => None,
        }
    }
}
