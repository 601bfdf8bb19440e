//! The four-step webhook intake pipeline: verify, dedupe, resolve
//! tenant, normalize+emit — identical shape for every provider kind,
//! parameterized over the normalized payload.

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::outbox::{self, NewEvent};
use crate::tenant;

use super::correlation;
use super::signature;
use super::types::{
    CalendarChangeWebhook, InboundSmsWebhook, Provider, SmsDeliveryStatusWebhook,
    SubscriptionChangeWebhook, VoiceStatusWebhook,
};

/// Outcome of one intake attempt; the HTTP layer maps this to a status
/// code (401 / 200, never leaking internal failures to the provider).
#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First delivery: receipt recorded, zero or more outbox events
    /// emitted.
    Accepted,
    /// Duplicate delivery; no-op, 200.
    Duplicate,
    /// The destination number/reference did not resolve to a tenant;
    /// 200 no-op to avoid carrier retries.
    UnresolvedTenant,
    /// Signature did not verify; 401, nothing persisted.
    InvalidSignature,
}

/// Verify `signature_hex` against the tenant-independent provider
/// secret. Voice/SMS/delivery webhooks share one carrier secret;
/// calendar and billing providers each have their own.
fn verify(secret: &[u8], method: &str, url: &str, body: &[u8], signature_hex: &str) -> bool {
    signature::verify(secret, method, url, body, signature_hex)
}

/// Insert the idempotency barrier. Returns `true` if this is the first
/// delivery of `(provider, provider_event_id)`, `false` if it's a
/// duplicate.
async fn probe_idempotency<'a, E>(executor: E, provider: Provider, provider_event_id: &str, tenant_id: Option<Uuid>, body_hash: &str) -> Result<bool, sqlx::Error>
where
E: sqlx::Executor<'a, Database = sqlx::Postgres>,
{
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        insert into webhook_receipts (provider, provider_event_id, tenant_id, body_hash)
        values ($1, $2, $3, $4)
        on conflict (provider, provider_event_id) do nothing
        returning id
        "#)
    .bind(provider.as_str())
    .bind(provider_event_id)
    .bind(tenant_id)
    .bind(body_hash)
    .fetch_optional(executor)
    .await?;

    Ok(inserted.is_some())
}

fn body_hash(body: &[u8]) -> String {
    hex::encode(blake3::hash(body).as_bytes())
}

/// Ingest a voice-status callback. Emits `telephony.CallDetected` only
/// for the three statuses that represent a missed call; other statuses
/// are recorded (dedupe barrier) but otherwise ignored.
#[allow(clippy::too_many_arguments)]
pub async fn ingest_voice_status(pool: &PgPool, secret: &[u8], method: &str, url: &str, raw_body: &[u8], signature_hex: &str, payload: VoiceStatusWebhook, correlation_reuse_window: Duration) -> Result<IngestOutcome, sqlx::Error> {
    if !verify(secret, method, url, raw_body, signature_hex) {
        return Ok(IngestOutcome::InvalidSignature);
    }

    let Some(tenant_id) = tenant::resolve_by_phone(pool, &payload.to).await? else {
        tracing::warn!(to = %payload.to, "voice-status webhook for unresolved tenant phone number");
        return Ok(IngestOutcome::UnresolvedTenant);
    };

    let mut tx = pool.begin().await?;

    let is_new = probe_idempotency(
        &mut *tx,
        Provider::Carrier,
        &payload.provider_event_id,
        Some(tenant_id),
        &body_hash(raw_body))
    .await?;

    if !is_new {
        tx.rollback().await?;
        tracing::info!(provider_event_id = %payload.provider_event_id, "duplicate voice-status webhook");
        return Ok(IngestOutcome::Duplicate);
    }

    if payload.status.is_missed_call() {
        let now = Utc::now();
        let correlation_id =
        correlation::resolve(&mut *tx, tenant_id, &payload.from, now, correlation_reuse_window)
        .await?;

        outbox::append(
            &mut *tx,
            NewEvent {
                tenant_id,
                event_name: "telephony.CallDetected",
                schema_version: "1.0.0",
                payload: json!({ "caller_phone": payload.from, "tenant_phone": payload.to, "reason": payload.status.reason(), "occurred_at": now, }),
                correlation_id,
                causation_id: None,
            })
        .await?;
    }

    tx.commit().await?;
    Ok(IngestOutcome::Accepted)
}

/// Ingest an inbound SMS. Always emits `sms.InboundSmsReceived`; the
/// conversation engine decides how to react (greeting, STOP/HELP,
/// append to existing conversation).
#[allow(clippy::too_many_arguments)]
pub async fn ingest_inbound_sms(pool: &PgPool, secret: &[u8], method: &str, url: &str, raw_body: &[u8], signature_hex: &str, payload: InboundSmsWebhook, correlation_reuse_window: Duration) -> Result<IngestOutcome, sqlx::Error> {
    if !verify(secret, method, url, raw_body, signature_hex) {
        return Ok(IngestOutcome::InvalidSignature);
    }

    let Some(tenant_id) = tenant::resolve_by_phone(pool, &payload.to).await? else {
        tracing::warn!(to = %payload.to, "inbound SMS webhook for unresolved tenant phone number");
        return Ok(IngestOutcome::UnresolvedTenant);
    };

    let mut tx = pool.begin().await?;

    let is_new = probe_idempotency(
        &mut *tx,
        Provider::Carrier,
        &payload.provider_event_id,
        Some(tenant_id),
        &body_hash(raw_body))
    .await?;

    if !is_new {
        tx.rollback().await?;
        return Ok(IngestOutcome::Duplicate);
    }

    let now = Utc::now();
    let correlation_id =
    correlation::resolve(&mut *tx, tenant_id, &payload.from, now, correlation_reuse_window)
    .await?;

    outbox::append(
        &mut *tx,
        NewEvent {
            tenant_id,
            event_name: "sms.InboundSmsReceived",
            schema_version: "1.0.0",
            payload: json!({ "caller_phone": payload.from, "tenant_phone": payload.to, "body": payload.body, "occurred_at": now, }),
            correlation_id,
            causation_id: None,
        })
    .await?;

    tx.commit().await?;
    Ok(IngestOutcome::Accepted)
}

/// Ingest an SMS delivery-status callback. Emits `sms.DeliveryUpdated`;
/// the conversation engine applies it idempotently to `Message.status`.
#[allow(clippy::too_many_arguments)]
pub async fn ingest_sms_delivery_status(pool: &PgPool, secret: &[u8], method: &str, url: &str, raw_body: &[u8], signature_hex: &str, payload: SmsDeliveryStatusWebhook) -> Result<IngestOutcome, sqlx::Error> {
    if !verify(secret, method, url, raw_body, signature_hex) {
        return Ok(IngestOutcome::InvalidSignature);
    }

    // Delivery callbacks reference an already-sent message; the tenant
    // is resolved downstream (the consumer looks up the message by
    // provider_ref), so intake only needs a tenant-agnostic dedupe scope.
    let mut tx = pool.begin().await?;

    let is_new = probe_idempotency(
        &mut *tx,
        Provider::Carrier,
        &payload.provider_event_id,
        None,
        &body_hash(raw_body))
    .await?;

    if !is_new {
        tx.rollback().await?;
        return Ok(IngestOutcome::Duplicate);
    }

    let tenant_id: Option<Uuid> = sqlx::query_scalar("select tenant_id from messages where provider_ref = $1")
    .bind(&payload.provider_ref)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(tenant_id) = tenant_id else {
        tx.commit().await?;
        tracing::warn!(provider_ref = %payload.provider_ref, "delivery status for unknown message");
        return Ok(IngestOutcome::UnresolvedTenant);
    };

    outbox::append(
        &mut *tx,
        NewEvent {
            tenant_id,
            event_name: "sms.DeliveryUpdated",
            schema_version: "1.0.0",
            payload: json!({ "provider_ref": payload.provider_ref, "status": payload.status, "occurred_at": Utc::now(), }),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
        })
    .await?;

    tx.commit().await?;
    Ok(IngestOutcome::Accepted)
}

/// Ingest an external calendar change push notification. Emits
/// `scheduling.ExternalCalendarChanged`, which the scheduling worker
/// consumes to mark the resource dirty and refresh the shadow busy
/// table.
pub async fn ingest_calendar_change(pool: &PgPool, secret: &[u8], method: &str, url: &str, raw_body: &[u8], signature_hex: &str, payload: CalendarChangeWebhook) -> Result<IngestOutcome, sqlx::Error> {
    if !verify(secret, method, url, raw_body, signature_hex) {
        return Ok(IngestOutcome::InvalidSignature);
    }

    let Some(tenant_id) = tenant::resolve_by_calendar_ref(pool, &payload.calendar_ref).await?
    else {
        return Ok(IngestOutcome::UnresolvedTenant);
    };

    let mut tx = pool.begin().await?;

    let is_new = probe_idempotency(
        &mut *tx,
        Provider::Calendar,
        &payload.provider_event_id,
        Some(tenant_id),
        &body_hash(raw_body))
    .await?;

    if !is_new {
        tx.rollback().await?;
        return Ok(IngestOutcome::Duplicate);
    }

    outbox::append(
        &mut *tx,
        NewEvent {
            tenant_id,
            event_name: "scheduling.ExternalCalendarChanged",
            schema_version: "1.0.0",
            payload: json!({ "calendar_ref": payload.calendar_ref, "occurred_at": Utc::now(), }),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
        })
    .await?;

    tx.commit().await?;
    Ok(IngestOutcome::Accepted)
}

/// Ingest a billing subscription-change webhook. The core only
/// verifies, dedupes, resolves tenant, and emits; any reaction to
/// `billing.SubscriptionChanged` (suspending a tenant, etc.) lives in
/// the external billing collaborator (Non-goals).
pub async fn ingest_subscription_change(
    pool: &PgPool,
    secret: &[u8],
    method: &str,
    url: &str,
    raw_body: &[u8],
    signature_hex: &str,
    payload: SubscriptionChangeWebhook,
    resolve_tenant_by_customer_ref: impl Fn(&str) -> Option<Uuid>) -> Result<IngestOutcome, sqlx::Error> {
    if !verify(secret, method, url, raw_body, signature_hex) {
        return Ok(IngestOutcome::InvalidSignature);
    }

    let Some(tenant_id) = resolve_tenant_by_customer_ref(&payload.customer_ref) else {
        return Ok(IngestOutcome::UnresolvedTenant);
    };

    let mut tx = pool.begin().await?;

    let is_new = probe_idempotency(
        &mut *tx,
        Provider::Billing,
        &payload.provider_event_id,
        Some(tenant_id),
        &body_hash(raw_body))
    .await?;

    if !is_new {
        tx.rollback().await?;
        return Ok(IngestOutcome::Duplicate);
    }

    outbox::append(
        &mut *tx,
        NewEvent {
            tenant_id,
            event_name: "billing.SubscriptionChanged",
            schema_version: "1.0.0",
            payload: json!({ "customer_ref": payload.customer_ref, "status": payload.status, "occurred_at": Utc::now(), }),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
        })
    .await?;

    tx.commit().await?;
    Ok(IngestOutcome::Accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_hash_is_stable_for_same_bytes() {
        assert_eq!(body_hash(b"hello"), body_hash(b"hello"));
        assert_ne!(body_hash(b"hello"), body_hash(b"world"));
    }
}
