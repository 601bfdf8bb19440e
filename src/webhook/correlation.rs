//! Correlation id allocation: reuse an open conversation's correlation
//! for the same caller within the reuse window, else allocate a new
//! one.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

/// Reuse the correlation id of the most recent outbox event for this
/// `(tenant_id, caller)` within `reuse_window` of `now`, or allocate a
/// fresh one.
///
/// The correlation id ties together every event arising from one
/// caller interaction; we look it up via the most recent
/// `first_response_trackers`/conversation activity rather than a
/// dedicated index, since the tracker table already keys on
/// `(tenant_id, correlation_id)` and is written on every inbound event.
pub async fn resolve<'a, E>(executor: E, tenant_id: Uuid, caller_phone: &str, now: DateTime<Utc>, reuse_window: Duration) -> Result<Uuid, sqlx::Error>
where
E: Executor<'a, Database = Postgres>,
{
    let cutoff = now - reuse_window;

    let existing: Option<Uuid> = sqlx::query_scalar(r#" select c.correlation_id from conversations c where c.tenant_id = $1 and c.caller_phone = $2 and c.last_activity_at >= $3 order by c.last_activity_at desc limit 1 "#)
    .bind(tenant_id)
    .bind(caller_phone)
    .bind(cutoff)
    .fetch_optional(executor)
    .await?;

    Ok(existing.unwrap_or_else(Uuid::new_v4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_is_now_minus_window() {
        let now = Utc::now();
        let window = Duration::minutes(10);
        let cutoff = now - window;
        assert!(cutoff < now);
        assert_eq!((now - cutoff), window);
    }
}
