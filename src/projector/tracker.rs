//! First-response tracker. Latency projection is reorder-tolerant by
//! construction: whichever of the inbound/outbound events arrives
//! first just records its own timestamp, and latency is computed once,
//! the moment both are present.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

/// Upsert the inbound-arrival timestamp for `(tenant_id,
/// correlation_id)`. If the row doesn't exist yet, it's created. If it
/// already exists because `record_outbound` arrived first, this
/// completes it the same way `record_outbound` completes a row that
/// arrived second: set `inbound_at` only if it was previously null, and
/// compute `latency_ms` only if `outbound_at` is already present and
/// `latency_ms` is still null. Idempotent either way: a redelivered
/// inbound event never moves `inbound_at` once it's set.
pub async fn record_inbound<'a, E>(executor: E, tenant_id: Uuid, correlation_id: Uuid, inbound_at: DateTime<Utc>) -> Result<(), sqlx::Error>
where
E: Executor<'a, Database = Postgres>,
{
    sqlx::query(
        r#"
        insert into first_response_trackers (tenant_id, correlation_id, inbound_at)
        values ($1, $2, $3)
        on conflict (tenant_id, correlation_id) do update set
        inbound_at = coalesce(first_response_trackers.inbound_at, excluded.inbound_at),
        latency_ms = case
        when first_response_trackers.inbound_at is null
        and first_response_trackers.outbound_at is not null
        and first_response_trackers.latency_ms is null
        then extract(epoch from (first_response_trackers.outbound_at - excluded.inbound_at)) * 1000
        else first_response_trackers.latency_ms
        end
        "#)
    .bind(tenant_id)
    .bind(correlation_id)
    .bind(inbound_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Set the outbound-enqueue timestamp and compute `latency_ms` only if
/// the inbound timestamp is present and the outbound timestamp was
/// previously null. This is the one place latency is computed,
/// guaranteeing it is never computed twice regardless of delivery
/// order or redelivery.
pub async fn record_outbound<'a, E>(executor: E, tenant_id: Uuid, correlation_id: Uuid, outbound_at: DateTime<Utc>) -> Result<(), sqlx::Error>
where
E: Executor<'a, Database = Postgres>,
{
    sqlx::query(
        r#"
        insert into first_response_trackers (tenant_id, correlation_id, outbound_at)
        values ($1, $2, $3)
        on conflict (tenant_id, correlation_id) do update set
        outbound_at = coalesce(first_response_trackers.outbound_at, excluded.outbound_at),
        latency_ms = case
        when first_response_trackers.outbound_at is null
        and first_response_trackers.inbound_at is not null
        then extract(epoch from (excluded.outbound_at - first_response_trackers.inbound_at)) * 1000
        else first_response_trackers.latency_ms
        end
        "#)
    .bind(tenant_id)
    .bind(correlation_id)
    .bind(outbound_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    // Exercised against a live Postgres in tests/projector_test.rs
    // (sqlx's query macros need a real connection to type-check the
    // `on conflict... do update` arithmetic); this module's unit tests
    // are limited to what's expressible without a database.
}
