//! Scheduling engine: availability search, reservation holds, booking,
//! and external-calendar reconciliation. Exclusively owns `Hold`,
//! `Appointment`, `ExternalBusy`.

pub mod availability;
pub mod consumer;
pub mod external_sync;
pub mod hold;

pub use consumer::ExternalCalendarChangedConsumer;
pub use hold::{BookOutcome, CancelOutcome, HoldOutcome};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapters::Timeslot;

/// One bookable slot returned by [`search_availability`]: which
/// resource, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AvailableSlot {
    pub resource_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Search availability across `resource_ids`. The window is capped at
/// `max_window` and results are deterministically ordered by resource,
/// then start.
pub async fn search_availability(pool: &PgPool, tenant_id: Uuid, resource_ids: &[Uuid], duration: Duration, window_start: DateTime<Utc>, window_end: DateTime<Utc>, granularity: Duration, max_window: Duration) -> Result<Vec<AvailableSlot>, sqlx::Error> {
    let window_end = window_end.min(window_start + max_window);
    let mut results = Vec::new();

    for &resource_id in resource_ids {
        let busy = busy_ranges(pool, tenant_id, resource_id, window_start, window_end).await?;
        let slots =
        availability::free_slots(busy, window_start, window_end, duration, granularity);
        results.extend(slots.into_iter().map(|s| AvailableSlot { resource_id, start: s.start, end: s.end, }));
    }

    Ok(results)
}

/// Busy = confirmed appointments ∪ non-expired holds ∪ external-busy
/// shadow rows for `resource_id`, clipped to the window .
async fn busy_ranges(pool: &PgPool, tenant_id: Uuid, resource_id: Uuid, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Result<Vec<Timeslot>, sqlx::Error> {
    let appts: Vec<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        select lower(timeslot), upper(timeslot)
        from appointments
        where tenant_id = $1 and resource_id = $2 and cancelled_at is null
        and timeslot && tstzrange($3, $4)
        "#)
    .bind(tenant_id)
    .bind(resource_id)
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await?;

    let holds: Vec<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        select lower(timeslot), upper(timeslot)
        from holds
        where tenant_id = $1 and resource_id = $2 and expires_at > now()
        and timeslot && tstzrange($3, $4)
        "#)
    .bind(tenant_id)
    .bind(resource_id)
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await?;

    let external: Vec<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        select lower(timeslot), upper(timeslot)
        from external_busy
        where tenant_id = $1 and resource_id = $2
        and timeslot && tstzrange($3, $4)
        "#)
    .bind(tenant_id)
    .bind(resource_id)
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await?;

    Ok(appts
        .into_iter()
        .chain(holds)
        .chain(external)
        .map(|(start, end)| Timeslot { start, end })
        .collect())
}

/// Delete holds past their TTL, emitting `AppointmentReleased` for
/// each. Returns the number of holds released.
pub async fn expire_holds(pool: &PgPool) -> Result<u64, sqlx::Error> {
    hold::expire_holds(pool).await
}
