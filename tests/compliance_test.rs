//! Compliance gate invariants (testable property 5): outbound sends
//! are denied while a tenant isn't approved, and opt-outs deny sends
//! regardless of campaign status.

use sqlx::PgPool;
use uuid::Uuid;

use nevermiss::compliance::{can_send, can_send_to, record_opt_out, set_campaign_status, CampaignStatus};

#[sqlx::test]
async fn can_send_is_false_until_campaign_is_approved(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    assert!(!can_send(&pool, tenant_id).await.unwrap(), "no campaign row yet");

    let mut tx = pool.begin().await.unwrap();
    set_campaign_status(&mut tx, tenant_id, CampaignStatus::Pending).await.unwrap();
    tx.commit().await.unwrap();
    assert!(!can_send(&pool, tenant_id).await.unwrap());

    let mut tx = pool.begin().await.unwrap();
    let previous = set_campaign_status(&mut tx, tenant_id, CampaignStatus::Approved).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(previous, Some(CampaignStatus::Pending));
    assert!(can_send(&pool, tenant_id).await.unwrap());

    let changed_events: i64 = sqlx::query_scalar(
        "select count(*) from outbox_events where event_name = 'compliance.ComplianceStatusChanged' and tenant_id = $1")
    .bind(tenant_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(changed_events, 2);
}

#[sqlx::test]
async fn opt_out_denies_sends_even_for_an_approved_campaign(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let caller = "+13105551212";

    let mut tx = pool.begin().await.unwrap();
    set_campaign_status(&mut tx, tenant_id, CampaignStatus::Approved).await.unwrap();
    tx.commit().await.unwrap();
    assert!(can_send_to(&pool, tenant_id, caller).await.unwrap());

    let mut tx = pool.begin().await.unwrap();
    record_opt_out(&mut tx, tenant_id, caller).await.unwrap();
    tx.commit().await.unwrap();

    assert!(!can_send_to(&pool, tenant_id, caller).await.unwrap());
    // Campaign-level predicate is unaffected; only the per-caller gate
    // changes.
    assert!(can_send(&pool, tenant_id).await.unwrap());
}

#[sqlx::test]
async fn opt_out_is_idempotent_per_tenant_and_phone(pool: PgPool) {
    let tenant_id = Uuid::new_v4();
    let caller = "+13105551212";

    let mut tx = pool.begin().await.unwrap();
    record_opt_out(&mut tx, tenant_id, caller).await.unwrap();
    record_opt_out(&mut tx, tenant_id, caller).await.unwrap();
    tx.commit().await.unwrap();

    let count: i64 = sqlx::query_scalar("select count(*) from opt_outs where tenant_id = $1 and phone = $2")
        .bind(tenant_id)
        .bind(caller)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
