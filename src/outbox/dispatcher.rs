//! Lease-and-dispatch loop.
//!
//! A pool of dispatcher workers leases pending rows with
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never contend on the
//! same row, hands each leased event to every registered consumer whose
//! prefix matches, and marks the row dispatched or reschedules it with
//! jittered backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info_span, Instrument};

use crate::rng::{retry_delay_ms, Jitter};

use super::consumer::{Consumer, ConsumerOutcome};
use super::envelope::OutboxEvent;

/// Tuning knobs for the dispatcher (environment
/// configuration: `OUTBOX_BATCH_SIZE`, `OUTBOX_CONCURRENCY`,
/// `RETRY_MAX_ATTEMPTS`, `RETRY_BACKOFF_CAP_SECONDS`).
#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub batch_size: u32,
    pub concurrency: u32,
    pub retry_max_attempts: u32,
    pub retry_backoff_cap: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 2,
            retry_max_attempts: 6,
            retry_backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Leases and dispatches outbox rows to registered consumers.
pub struct Dispatcher {
    pool: PgPool,
    consumers: Vec<Arc<dyn Consumer>>,
    settings: DispatcherSettings,
    jitter: Arc<dyn Jitter>,
}

impl Dispatcher {
    pub fn new(pool: PgPool, consumers: Vec<Arc<dyn Consumer>>, settings: DispatcherSettings, jitter: Arc<dyn Jitter>) -> Self {
        Self {
            pool,
            consumers,
            settings,
            jitter,
        }
    }

    /// Lease and process one batch. Returns the number of rows leased
    /// (0 means the queue was empty; callers typically back off before /// the next tick in that case).
    pub async fn run_once(&self) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let leased: Vec<OutboxEvent> = sqlx::query_as(
            r#"
            select event_id, tenant_id, event_name, schema_version, payload,
            correlation_id, causation_id, created_at, available_at,
            attempts, last_error, dispatched_at
            from outbox_events
            where dispatched_at is null and available_at <= now()
            order by created_at
            limit $1
            for update skip locked
            "#)
        .bind(i64::from(self.settings.batch_size))
        .fetch_all(&mut *tx)
        .await?;

        let leased_count = leased.len();

        for event in &leased {
            self.process_one(&mut tx, event).await?;
        }

        tx.commit().await?;
        Ok(leased_count)
    }

    async fn process_one(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, event: &OutboxEvent) -> Result<(), sqlx::Error> {
        let span = info_span!("outbox_dispatch", event_id = %event.event_id, event_name = %event.event_name, tenant_id = %event.tenant_id, correlation_id = %event.correlation_id, attempts = event.attempts);

        async {
            let matching: Vec<&Arc<dyn Consumer>> = self
            .consumers
            .iter()
            .filter(|c| event.event_name.starts_with(c.event_name_prefix()))
            .collect();

            let mut failure: Option<String> = None;
            let mut dead_letter: Option<String> = None;

            for consumer in matching {
                match consumer.handle(event).await {
                    ConsumerOutcome::Ok => {}
                    ConsumerOutcome::Retry { reason } => {
                        tracing::warn!(consumer = consumer.name(), %reason, "consumer requested retry");
                        failure.get_or_insert(reason);
                    }
                    ConsumerOutcome::DeadLetter { reason } => {
                        tracing::error!(consumer = consumer.name(), %reason, "consumer declared fatal failure");
                        dead_letter.get_or_insert(reason);
                    }
                }
            }

            if let Some(reason) = dead_letter {
                self.force_dead_letter(tx, event, &reason).await
            } else if let Some(reason) = failure {
                self.reschedule(tx, event, &reason).await
            } else {
                self.mark_dispatched(tx, event).await
            }
        }
        .instrument(span)
        .await
    }

    async fn mark_dispatched(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, event: &OutboxEvent) -> Result<(), sqlx::Error> {
        sqlx::query("update outbox_events set dispatched_at = now() where event_id = $1")
        .bind(event.event_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn reschedule(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, event: &OutboxEvent, reason: &str) -> Result<(), sqlx::Error> {
        let attempts = event.attempts.saturating_add(1);
        let cap_ms = u64::try_from(self.settings.retry_backoff_cap.as_millis()).unwrap_or(u64::MAX);
        let attempts_u32 = u32::try_from(attempts).unwrap_or(0);
        let delay_ms = retry_delay_ms(self.jitter.as_ref(), attempts_u32, cap_ms);
        let delay_ms_i64 = i64::try_from(delay_ms).unwrap_or(i64::MAX);
        let available_at = Utc::now() + chrono::Duration::milliseconds(delay_ms_i64);

        sqlx::query("update outbox_events set attempts = $2, last_error = $3, available_at = $4 where event_id = $1")
        .bind(event.event_id)
        .bind(attempts)
        .bind(reason)
        .bind(available_at)
        .execute(&mut **tx)
        .await?;

        if attempts_u32 >= self.settings.retry_max_attempts {
            tracing::warn!(event_id = %event.event_id, attempts, "event exhausted retry budget, now visible in dead-letter view");
        }
        Ok(())
    }

    async fn force_dead_letter(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, event: &OutboxEvent, reason: &str) -> Result<(), sqlx::Error> {
        // Jump straight to (or past) the retry ceiling so the row shows
        // up in `outbox_dead_letters` without waiting out the backoff
        // schedule; the full envelope is retained, never deleted.
        sqlx::query("update outbox_events set attempts = $2, last_error = $3 where event_id = $1")
        .bind(event.event_id)
        .bind(i32::try_from(self.settings.retry_max_attempts.max(1)).unwrap_or(i32::MAX))
        .bind(reason)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
