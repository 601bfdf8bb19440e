//! External calendar reconciliation: refreshes the `external_busy`
//! shadow table from the authoritative calendar, either on a push
//! notification or on a fixed polling interval as fallback.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapters::CalendarClient;
use crate::error::NevermissError;

/// A resource mirroring an external calendar.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExternalResource {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_source: String,
    pub external_calendar_ref: String,
}

/// Resources whose `dirty` flag is set (pushed notification pending
/// refresh) or that mirror an external calendar at all (for the
/// polling fallback).
pub async fn dirty_resources(pool: &PgPool) -> Result<Vec<ExternalResource>, sqlx::Error> {
    sqlx::query_as(r#" select id, tenant_id, external_source, external_calendar_ref from resources where dirty and external_calendar_ref is not null "#)
    .fetch_all(pool)
    .await
}

pub async fn all_external_resources(pool: &PgPool) -> Result<Vec<ExternalResource>, sqlx::Error> {
    sqlx::query_as(r#" select id, tenant_id, external_source, external_calendar_ref from resources where external_calendar_ref is not null "#)
    .fetch_all(pool)
    .await
}

/// Mark a resource dirty so the next sweep refreshes it immediately
/// rather than waiting for the polling interval. Push notifications
/// from external calendars mark the affected resource dirty this way.
pub async fn mark_dirty(pool: &PgPool, resource_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("update resources set dirty = true where id = $1")
    .bind(resource_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Read authoritative busy ranges for `resource` and upsert the shadow
/// table. A conservative +/- 24h window is refreshed
/// each time; callers needing a wider horizon can call this repeatedly
/// per shift.
pub async fn refresh(pool: &PgPool, calendar: &dyn CalendarClient, resource: &ExternalResource, window: Duration) -> Result<(), NevermissError> {
    let now = Utc::now();
    let busy = calendar
    .list_busy(&resource.external_calendar_ref, now - window, now + window)
    .await
    .map_err(|e| NevermissError::TransientUpstream(e.to_string()))?;

    let mut tx = pool.begin().await?;

    sqlx::query("delete from external_busy where resource_id = $1")
    .bind(resource.id)
    .execute(&mut *tx)
    .await?;

    for slot in &busy {
        sqlx::query(
            r#"
            insert into external_busy (tenant_id, resource_id, source, timeslot)
            values ($1, $2, $3, tstzrange($4, $5))
            "#)
        .bind(resource.tenant_id)
        .bind(resource.id)
        .bind(&resource.external_source)
        .bind(slot.start)
        .bind(slot.end)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("update resources set dirty = false where id = $1")
    .bind(resource.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    check_conflicts(pool, resource).await?;
    Ok(())
}

/// Raise an operational alert (logged, per : "rare
/// when the system owns bookings") when a confirmed local appointment
/// overlaps a newly-synced external busy block.
async fn check_conflicts(pool: &PgPool, resource: &ExternalResource) -> Result<(), sqlx::Error> {
    let conflicts: i64 = sqlx::query_scalar(
        r#"
        select count(*)
        from appointments a
        join external_busy e on e.resource_id = a.resource_id and a.timeslot && e.timeslot
        where a.resource_id = $1 and a.cancelled_at is null
        "#)
    .bind(resource.id)
    .fetch_one(pool)
    .await?;

    if conflicts > 0 {
        tracing::error!(resource_id = %resource.id, tenant_id = %resource.tenant_id, conflicts, "confirmed appointment overlaps external calendar busy block");
    }
    Ok(())
}
