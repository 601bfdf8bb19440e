//! Daily KPI rollup counters.

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

/// Increment `counter` for `tenant_id` on `day`, but only the first
/// time `event_id` is seen by `consumer_name`. The outbox redelivers
/// at-least-once, so a count fed directly off dispatch (rather than off
/// a source-of-truth insert like [`crate::projector::revenue::record`])
/// needs its own natural-key dedup: a `(consumer_name, event_id)` row is
/// planted before the counter moves, and a retry of the same event is a
/// no-op.
pub async fn increment_once(pool: &PgPool, consumer_name: &str, event_id: Uuid, tenant_id: Uuid, day: NaiveDate, counter: Counter) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let first_time = sqlx::query(
        r#"
        insert into projector_processed_events (consumer_name, event_id)
        values ($1, $2)
        on conflict (consumer_name, event_id) do nothing
        "#)
    .bind(consumer_name)
    .bind(event_id)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        > 0;

    if first_time {
        let column = counter.column();
        let sql = format!(
            r#"
            insert into daily_kpi_rollups (tenant_id, day, {column})
            values ($1, $2, 1)
            on conflict (tenant_id, day) do update set {column} = daily_kpi_rollups.{column} + 1
            "#
        );
        sqlx::query(&sql).bind(tenant_id).bind(day).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Which counter to increment for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    CallsDetected,
    ConversationsStarted,
    AppointmentsBooked,
}

impl Counter {
    fn column(self) -> &'static str {
        match self {
            Counter::CallsDetected => "calls_detected",
            Counter::ConversationsStarted => "conversations_started",
            Counter::AppointmentsBooked => "appointments_booked",
        }
    }
}

/// Increment one counter for `tenant_id` on `day`, upserting the row if
/// it doesn't exist yet.
pub async fn increment(pool: &PgPool, tenant_id: Uuid, day: NaiveDate, counter: Counter) -> Result<(), sqlx::Error> {
    let column = counter.column();
    let sql = format!(
        r#"
        insert into daily_kpi_rollups (tenant_id, day, {column})
        values ($1, $2, 1)
        on conflict (tenant_id, day) do update set {column} = daily_kpi_rollups.{column} + 1
        "#
    );
    sqlx::query(&sql).bind(tenant_id).bind(day).execute(pool).await?;
    Ok(())
}

/// Add `price_cents` to the revenue counter for `tenant_id` on `day`
/// (revenue rolls up alongside the booking count).
pub async fn add_revenue(pool: &PgPool, tenant_id: Uuid, day: NaiveDate, price_cents: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        insert into daily_kpi_rollups (tenant_id, day, revenue_cents)
        values ($1, $2, $3)
        on conflict (tenant_id, day) do update set
        revenue_cents = daily_kpi_rollups.revenue_cents + excluded.revenue_cents
        "#)
    .bind(tenant_id)
    .bind(day)
    .bind(price_cents)
    .execute(pool)
    .await?;
    Ok(())
}

/// Recompute exact p50/p95 latency for `tenant_id` on `day` from
/// `first_response_trackers`, computed exactly rather than approximated.
/// Called after each latency is recorded;
/// cheap at the data volumes this system targets (one tenant-day of
/// rows at a time).
pub async fn recompute_latency_percentiles(pool: &PgPool, tenant_id: Uuid, day: NaiveDate) -> Result<(), sqlx::Error> {
    let percentiles: Option<(Option<f64>, Option<f64>)> = sqlx::query_as(
        r#"
        select
        percentile_cont(0.5) within group (order by latency_ms) as p50,
        percentile_cont(0.95) within group (order by latency_ms) as p95
        from first_response_trackers
        where tenant_id = $1
        and latency_ms is not null
        and inbound_at >= $2::date and inbound_at < ($2::date + interval '1 day')
        "#)
    .bind(tenant_id)
    .bind(day)
    .fetch_optional(pool)
    .await?;

    let (p50, p95) = percentiles.unwrap_or((None, None));

    sqlx::query(
        r#"
        insert into daily_kpi_rollups (tenant_id, day, latency_p50_ms, latency_p95_ms)
        values ($1, $2, $3, $4)
        on conflict (tenant_id, day) do update set
        latency_p50_ms = excluded.latency_p50_ms,
        latency_p95_ms = excluded.latency_p95_ms
        "#)
    .bind(tenant_id)
    .bind(day)
    .bind(p50.and_then(round_to_ms))
    .bind(p95.and_then(round_to_ms))
    .execute(pool)
    .await?;

    Ok(())
}

/// Convert a floating-point millisecond value from `percentile_cont`
/// into an integer column value, saturating rather than panicking on
/// out-of-range input.
fn round_to_ms(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let rounded = value.round() as i64;
    Some(rounded)
}
