//! Read-model projector invariants (testable property 6, scenario S7):
//! latency is computed exactly once, however inbound/outbound events
//! interleave.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nevermiss::projector::tracker::{record_inbound, record_outbound};

#[sqlx::test]
async fn inbound_then_outbound_computes_latency_once(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();
    let inbound_at = Utc::now();
    let outbound_at = inbound_at + Duration::milliseconds(1234);

    record_inbound(&pool, tenant_id, correlation_id, inbound_at).await.unwrap();
    record_outbound(&pool, tenant_id, correlation_id, outbound_at).await.unwrap();

    let (latency,): (Option<i64>,) = sqlx::query_as(
        "select latency_ms from first_response_trackers where tenant_id = $1 and correlation_id = $2")
    .bind(tenant_id)
    .bind(correlation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(latency, Some(1234));
}

#[sqlx::test]
async fn outbound_before_inbound_is_reorder_tolerant(pool: PgPool) {
    // S7: deliver OutboundQueued before CallDetected. Tracker row is
    // created with null latency; CallDetected completes it once.
    let tenant_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();
    let outbound_at = Utc::now();
    let inbound_at = outbound_at - Duration::milliseconds(500);

    record_outbound(&pool, tenant_id, correlation_id, outbound_at).await.unwrap();

    let (latency_before,): (Option<i64>,) = sqlx::query_as(
        "select latency_ms from first_response_trackers where tenant_id = $1 and correlation_id = $2")
    .bind(tenant_id)
    .bind(correlation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(latency_before, None, "latency is unknown until the inbound timestamp arrives");

    record_inbound(&pool, tenant_id, correlation_id, inbound_at).await.unwrap();

    let (latency_after,): (Option<i64>,) = sqlx::query_as(
        "select latency_ms from first_response_trackers where tenant_id = $1 and correlation_id = $2")
    .bind(tenant_id)
    .bind(correlation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(latency_after, Some(500), "CallDetected completes the row once it arrives");

    // A second, redelivered CallDetected must not recompute anything.
    record_inbound(&pool, tenant_id, correlation_id, inbound_at - Duration::seconds(60)).await.unwrap();
    let (latency_final,): (Option<i64>,) = sqlx::query_as(
        "select latency_ms from first_response_trackers where tenant_id = $1 and correlation_id = $2")
    .bind(tenant_id)
    .bind(correlation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(latency_final, Some(500));
}

#[sqlx::test]
async fn redelivering_the_same_inbound_event_does_not_move_the_timestamp(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();
    let first = Utc::now();
    let later = first + Duration::seconds(5);

    record_inbound(&pool, tenant_id, correlation_id, first).await.unwrap();
    record_inbound(&pool, tenant_id, correlation_id, later).await.unwrap();

    let (inbound_at,): (Option<chrono::DateTime<Utc>>,) = sqlx::query_as(
        "select inbound_at from first_response_trackers where tenant_id = $1 and correlation_id = $2")
    .bind(tenant_id)
    .bind(correlation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(inbound_at, Some(first));
}

#[sqlx::test]
async fn redelivering_the_same_outbound_event_does_not_recompute_latency(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let correlation_id = Uuid::new_v4();
    let inbound_at = Utc::now();
    let outbound_at = inbound_at + Duration::milliseconds(1000);
    let later_outbound_at = outbound_at + Duration::seconds(10);

    record_inbound(&pool, tenant_id, correlation_id, inbound_at).await.unwrap();
    record_outbound(&pool, tenant_id, correlation_id, outbound_at).await.unwrap();
    record_outbound(&pool, tenant_id, correlation_id, later_outbound_at).await.unwrap();

    let (latency,): (Option<i64>,) = sqlx::query_as(
        "select latency_ms from first_response_trackers where tenant_id = $1 and correlation_id = $2")
    .bind(tenant_id)
    .bind(correlation_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(latency, Some(1000), "latency must be computed only once, from the first outbound timestamp");
}
