//! Webhook intake: signature verification, duplicate suppression,
//! tenant resolution, and normalize-and-emit — one handler per provider
//! kind, all sharing the same four-step shape.

pub mod correlation;
pub mod intake;
pub mod signature;
pub mod types;

pub use intake::IngestOutcome;

use std::future::Future;
use std::time::Duration;

use sqlx::PgPool;

use crate::rng::Jitter;

/// Retry a single intake attempt against transient database failures:
/// up to `max_attempts` tries with full-jitter backoff capped at
/// `backoff_cap`; on final failure return 200 and log to an error
/// table.
///
/// `attempt` is retried as-is on any `sqlx::Error`; the caller is
/// expected to be idempotent-safe to re-run (intake transactions are
/// all-or-nothing, so a failed attempt leaves no partial state behind).
pub async fn ingest_with_retry<F, Fut>(pool: &PgPool, jitter: &dyn Jitter, provider: &str, max_attempts: u32, backoff_cap: Duration, mut attempt: F) -> IngestOutcome
where
F: FnMut() -> Fut,
Fut: Future<Output = Result<IngestOutcome, sqlx::Error>>,
{
    let cap_ms = u64::try_from(backoff_cap.as_millis()).unwrap_or(u64::MAX);
    let mut last_error = String::new();

    for n in 0..max_attempts {
        match attempt().await {
            Ok(outcome) => return outcome,
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(provider, attempt = n, error = %last_error, "transient intake failure");
                let delay_ms = crate::rng::retry_delay_ms(jitter, n, cap_ms);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }

    tracing::error!(provider, error = %last_error, "webhook intake exhausted retry budget");
    if let Err(log_err) = record_ingest_error(pool, provider, &last_error).await {
        tracing::error!(error = %log_err, "failed to record ingest error");
    }

    // Return 200 regardless so the provider does not retry
    // indefinitely; operator reconciliation is assumed.
    IngestOutcome::Accepted
}

async fn record_ingest_error(pool: &PgPool, provider: &str, detail: &str) -> Result<(), sqlx::Error> {
    sqlx::query("insert into ingest_errors (provider, detail) values ($1, $2)")
    .bind(provider)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(())
}
