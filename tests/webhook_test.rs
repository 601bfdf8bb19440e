//! Idempotent ingest (testable property 1): replaying the same
//! provider event any number of times yields exactly one
//! `WebhookReceipt` and at most one outbox event.

use sqlx::PgPool;
use uuid::Uuid;

use nevermiss::webhook::intake::{ingest_voice_status, IngestOutcome};
use nevermiss::webhook::signature;
use nevermiss::webhook::types::{VoiceStatus, VoiceStatusWebhook};

const SECRET: &[u8] = b"carrier-shared-secret";

async fn seed_tenant(pool: &PgPool, to: &str) -> Uuid {
    let tenant_id: Uuid = sqlx::query_scalar(
        "insert into tenants (business_name, support_phone) values ($1, $2) returning id")
    .bind("Acme Dental")
    .bind("+13105550001")
    .fetch_one(pool)
    .await
    .unwrap();

    sqlx::query("insert into tenant_phone_numbers (tenant_id, e164, receiving) values ($1, $2, true)")
    .bind(tenant_id)
    .bind(to)
    .execute(pool)
    .await
    .unwrap();

    tenant_id
}

fn voice_status_payload(call_sid: &str, from: &str, to: &str) -> VoiceStatusWebhook {
    VoiceStatusWebhook {
        provider_event_id: call_sid.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        status: VoiceStatus::NoAnswer,
    }
}

#[sqlx::test]
async fn duplicate_voice_webhook_is_suppressed(pool: PgPool) {
    let to = "+13105550000";
    seed_tenant(&pool, to).await;

    let method = "POST";
    let url = "https://nevermiss.example/webhooks/voice-status";
    let body = b"call_sid=CA1&status=no-answer";
    let sig = signature::sign(SECRET, method, url, body);
    let payload = voice_status_payload("CA1", "+13105551212", to);

    let first = ingest_voice_status(&pool, SECRET, method, url, body, &sig, payload.clone(), chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(first, IngestOutcome::Accepted);

    for _ in 0..5 {
        let repeat = ingest_voice_status(&pool, SECRET, method, url, body, &sig, payload.clone(), chrono::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(repeat, IngestOutcome::Duplicate);
    }

    let receipt_count: i64 = sqlx::query_scalar("select count(*) from webhook_receipts where provider_event_id = 'CA1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(receipt_count, 1);

    let event_count: i64 = sqlx::query_scalar("select count(*) from outbox_events where event_name = 'telephony.CallDetected'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(event_count, 1);
}

#[sqlx::test]
async fn invalid_signature_persists_nothing(pool: PgPool) {
    let to = "+13105550002";
    seed_tenant(&pool, to).await;

    let method = "POST";
    let url = "https://nevermiss.example/webhooks/voice-status";
    let body = b"call_sid=CA2&status=no-answer";
    let payload = voice_status_payload("CA2", "+13105551212", to);

    let outcome = ingest_voice_status(&pool, SECRET, method, url, body, "deadbeef", payload, chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::InvalidSignature);

    let receipt_count: i64 = sqlx::query_scalar("select count(*) from webhook_receipts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(receipt_count, 0);
}

#[sqlx::test]
async fn unresolved_tenant_phone_is_a_no_op(pool: PgPool) {
    let method = "POST";
    let url = "https://nevermiss.example/webhooks/voice-status";
    let body = b"call_sid=CA3&status=no-answer";
    let sig = signature::sign(SECRET, method, url, body);
    let payload = voice_status_payload("CA3", "+13105551212", "+19999999999");

    let outcome = ingest_voice_status(&pool, SECRET, method, url, body, &sig, payload, chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::UnresolvedTenant);

    let receipt_count: i64 = sqlx::query_scalar("select count(*) from webhook_receipts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(receipt_count, 0);
}
