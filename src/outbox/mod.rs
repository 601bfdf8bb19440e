//! The transactional outbox: the only cross-component communication
//! mechanism. Producers append rows in the same transaction as their
//! state change; [`dispatcher::Dispatcher`] leases and delivers them
//! at-least-once to registered [`consumer::Consumer`]s.

pub mod consumer;
pub mod dispatcher;
pub mod envelope;

pub use consumer::{Consumer, ConsumerOutcome};
pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use envelope::{append, NewEvent, OutboxEvent};

use sqlx::PgPool;
use uuid::Uuid;

/// One row of the dead-letter view (GLOSSARY): an
/// outbox event whose attempts have exceeded the retry budget, retained
/// with its full envelope for replay/debugging.
pub async fn dead_letters(pool: &PgPool) -> Result<Vec<OutboxEvent>, sqlx::Error> {
    sqlx::query_as(r#" select event_id, tenant_id, event_name, schema_version, payload, correlation_id, causation_id, created_at, available_at, attempts, last_error, dispatched_at from outbox_dead_letters order by created_at "#)
    .fetch_all(pool)
    .await
}

/// Re-enqueue a dead-lettered event: reset `attempts` to 0 and
/// `available_at` to now, preserving `event_id` so consumer-side
/// duplicate-delivery accounting (natural keying) still holds.
pub async fn replay(pool: &PgPool, event_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "update outbox_events set attempts = 0, available_at = now(), last_error = null
        where event_id = $1 and dispatched_at is null")
    .bind(event_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Re-enqueue every event in `[from, to]` (inclusive, by `event_id`)
/// for redelivery, regardless of prior dispatch state. This is operator
/// reconciliation after a consumer-side bug or an incident, not part of
/// ordinary at-least-once delivery. Resets `attempts` and `last_error`
/// the same way [`replay`] does for a single event.
pub async fn reprocess_range(pool: &PgPool, from: Uuid, to: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "update outbox_events set dispatched_at = null, available_at = now(), attempts = 0, last_error = null
        where event_id between $1 and $2")
    .bind(from)
    .bind(to)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Delete outbox rows dispatched more than `retention` ago. Returns
/// the number of rows removed.
pub async fn sweep_dispatched(pool: &PgPool, retention: chrono::Duration) -> Result<u64, sqlx::Error> {
    let cutoff = chrono::Utc::now() - retention;
    let result = sqlx::query("delete from outbox_events where dispatched_at < $1")
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_settings_defaults_are_sane() {
        let s = DispatcherSettings::default();
        assert_eq!(s.batch_size, 100);
        assert_eq!(s.concurrency, 2);
        assert_eq!(s.retry_max_attempts, 6);
        assert_eq!(s.retry_backoff_cap, std::time::Duration::from_secs(30));
    }
}
