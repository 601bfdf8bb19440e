//! Outbox consumers that drive the conversation engine : `telephony.CallDetected` and `sms.InboundSmsReceived` both
//! trigger first-reply-or-append; `sms.DeliveryUpdated` applies carrier
//! delivery callbacks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapters::{Composer, SmsSender};
use crate::compliance;
use crate::outbox::{ConsumerOutcome, OutboxEvent};
use crate::tenant;

use super::engine;
use super::state::ConversationState;

/// Reacts to `telephony.CallDetected` by running the first-reply flow
/// (no "subsequent message" branch applies to a missed call: there is no message body to append).
pub struct CallDetectedConsumer {
    pool: PgPool,
    composer: Option<Arc<dyn Composer>>,
    ai_compose_deadline: Duration,
}

impl CallDetectedConsumer {
    pub fn new(pool: PgPool, composer: Option<Arc<dyn Composer>>, ai_compose_deadline: Duration) -> Self {
        Self {
            pool,
            composer,
            ai_compose_deadline,
        }
    }
}

#[derive(Deserialize)]
struct CallDetectedPayload {
    caller_phone: String,
}

#[async_trait]
impl crate::outbox::Consumer for CallDetectedConsumer {
    fn event_name_prefix(&self) -> &str {
        "telephony."
    }

    fn name(&self) -> &str {
        "conversation::call_detected"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "telephony.CallDetected" {
            return ConsumerOutcome::Ok;
        }

        let payload: CallDetectedPayload = match serde_json::from_value(event.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("malformed CallDetected payload: {e}"),
                }
            }
        };

        let profile = match tenant::profile(&self.pool, event.tenant_id).await {
            Ok(p) => p,
            Err(e) => return ConsumerOutcome::Retry { reason: e.to_string() },
        };

        match engine::handle_first_contact(&self.pool, self.composer.as_ref(), self.ai_compose_deadline, event.tenant_id, &payload.caller_phone, event.correlation_id, &profile.business_name, None)
        .await
        {
            Ok(()) => ConsumerOutcome::Ok,
            Err(e) => ConsumerOutcome::Retry { reason: e.to_string() },
        }
    }
}

/// Reacts to `sms.InboundSmsReceived`: first-reply flow if no
/// conversation is active yet, otherwise the "subsequent inbound
/// messages" rules.
pub struct InboundSmsConsumer {
    pool: PgPool,
    composer: Option<Arc<dyn Composer>>,
    ai_compose_deadline: Duration,
}

impl InboundSmsConsumer {
    pub fn new(pool: PgPool, composer: Option<Arc<dyn Composer>>, ai_compose_deadline: Duration) -> Self {
        Self {
            pool,
            composer,
            ai_compose_deadline,
        }
    }
}

#[derive(Deserialize)]
struct InboundSmsPayload {
    caller_phone: String,
    body: String,
}

#[async_trait]
impl crate::outbox::Consumer for InboundSmsConsumer {
    fn event_name_prefix(&self) -> &str {
        "sms."
    }

    fn name(&self) -> &str {
        "conversation::inbound_sms"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "sms.InboundSmsReceived" {
            return ConsumerOutcome::Ok;
        }

        let payload: InboundSmsPayload = match serde_json::from_value(event.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("malformed InboundSmsReceived payload: {e}"),
                }
            }
        };

        let profile = match tenant::profile(&self.pool, event.tenant_id).await {
            Ok(p) => p,
            Err(e) => return ConsumerOutcome::Retry { reason: e.to_string() },
        };

        let active = {
            let mut tx = match self.pool.begin().await {
                Ok(tx) => tx,
                Err(e) => return ConsumerOutcome::Retry { reason: e.to_string() },
            };
            let result = engine::find_active(&mut tx, event.tenant_id, &payload.caller_phone).await;
            let _ = tx.rollback().await;
            match result {
                Ok(found) => found,
                Err(e) => return ConsumerOutcome::Retry { reason: e.to_string() },
            }
        };

        let result = match active {
            None => {
                engine::handle_first_contact(
                    &self.pool,
                    self.composer.as_ref(),
                    self.ai_compose_deadline,
                    event.tenant_id,
                    &payload.caller_phone,
                    event.correlation_id,
                    &profile.business_name,
                    Some(&payload.body))
                .await
            }
            Some(conversation) => {
                engine::handle_subsequent_inbound(&self.pool, self.composer.as_ref(), self.ai_compose_deadline, conversation, &payload.body, &profile.business_name, &profile.support_phone)
                .await
            }
        };

        match result {
            Ok(()) => ConsumerOutcome::Ok,
            Err(e) => ConsumerOutcome::Retry { reason: e.to_string() },
        }
    }
}

#[derive(Deserialize)]
struct DeliveryUpdatedPayload {
    provider_ref: String,
    status: String,
}

/// Reacts to `sms.DeliveryUpdated`: applies carrier status callbacks
/// idempotently, keeping `queued -> sent -> delivered` monotonic and
/// `failed` terminal.
pub struct DeliveryUpdateConsumer {
    pool: PgPool,
}

impl DeliveryUpdateConsumer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn rank(status: &str) -> i32 {
    match status {
        "queued" => 0,
        "sent" => 1,
        "delivered" => 2,
        "failed" => 2,
        _ => -1,
    }
}

/// `delivered` and `failed` are both terminal: once reached, no later
/// callback (including a reordered or redelivered one) may move the
/// status again.
fn is_terminal(status: &str) -> bool {
    matches!(status, "delivered" | "failed")
}

#[async_trait]
impl crate::outbox::Consumer for DeliveryUpdateConsumer {
    fn event_name_prefix(&self) -> &str {
        "sms."
    }

    fn name(&self) -> &str {
        "conversation::delivery_update"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "sms.DeliveryUpdated" {
            return ConsumerOutcome::Ok;
        }

        let payload: DeliveryUpdatedPayload = match serde_json::from_value(event.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("malformed DeliveryUpdated payload: {e}"),
                }
            }
        };

        if rank(&payload.status) < 0 {
            return ConsumerOutcome::DeadLetter {
                reason: format!("unknown delivery status {:?}", payload.status),
            };
        }

        match apply_delivery_update(&self.pool, &payload.provider_ref, &payload.status).await {
            Ok(()) => ConsumerOutcome::Ok,
            Err(e) => ConsumerOutcome::Retry { reason: e.to_string() },
        }
    }
}

async fn apply_delivery_update(pool: &PgPool, provider_ref: &str, status: &str) -> Result<(), sqlx::Error> {
    let current: Option<String> =
    sqlx::query_scalar("select status from messages where provider_ref = $1")
    .bind(provider_ref)
    .fetch_optional(pool)
    .await?;

    let Some(current) = current else {
        tracing::warn!(provider_ref, "delivery update for unknown message");
        return Ok(());
    };

    // Monotonic: never move backward (e.g. a reordered `sent` arriving
    // after `delivered`), and once a terminal status is reached
    // (`delivered` or `failed`) no later callback may overwrite it —
    // in particular a late `failed` must not regress a `delivered`.
    if is_terminal(&current) {
        return Ok(());
    }
    if rank(status) <= rank(&current) {
        return Ok(());
    }

    sqlx::query("update messages set status = $2 where provider_ref = $1")
    .bind(provider_ref)
    .bind(status)
    .execute(pool)
    .await?;

    Ok(())
}

/// Unblock conversations when a tenant's compliance status transitions
/// from not-approved to approved.
pub struct ComplianceUnblockConsumer {
    pool: PgPool,
}

impl ComplianceUnblockConsumer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Deserialize)]
struct ComplianceStatusChangedPayload {
    new_status: String,
}

#[async_trait]
impl crate::outbox::Consumer for ComplianceUnblockConsumer {
    fn event_name_prefix(&self) -> &str {
        "compliance."
    }

    fn name(&self) -> &str {
        "conversation::compliance_unblock"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "compliance.ComplianceStatusChanged" {
            return ConsumerOutcome::Ok;
        }

        let payload: ComplianceStatusChangedPayload = match serde_json::from_value(event.payload.clone())
        {
            Ok(p) => p,
            Err(e) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("malformed ComplianceStatusChanged payload: {e}"),
                }
            }
        };

        if payload.new_status != "approved" {
            // not-approved transitions block conversations going
            // forward (the gate itself denies sends); existing open
            // conversations are left as-is until a future revision
            // decides whether to force-block them immediately.
            return ConsumerOutcome::Ok;
        }

        match unblock_tenant(&self.pool, event.tenant_id).await {
            Ok(()) => ConsumerOutcome::Ok,
            Err(e) => ConsumerOutcome::Retry { reason: e.to_string() },
        }
    }
}

async fn unblock_tenant(pool: &PgPool, tenant_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("update conversations set state = $2 where tenant_id = $1 and state = 'blocked'")
    .bind(tenant_id)
    .bind(ConversationState::Open.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Deserialize)]
struct OutboundQueuedPayload {
    conversation_id: Uuid,
    message_id: Uuid,
    client_dedup_key: String,
}

#[derive(sqlx::FromRow)]
struct QueuedMessageRow {
    body: String,
    status: String,
    caller_phone: String,
}

/// Reacts to `conversation.OutboundQueued` by performing the actual
/// carrier send, after commit. The send itself sits behind the outbox,
/// so a redelivered event is a no-op once `provider_ref` is attached,
/// and a failed carrier call is retried through the same
/// `client_dedup_key` so the carrier never double-sends.
pub struct OutboundSendConsumer {
    pool: PgPool,
    sender: Option<Arc<dyn SmsSender>>,
    status_callback_base_url: String,
    pause_outbound_sms: bool,
}

impl OutboundSendConsumer {
    pub fn new(pool: PgPool, sender: Option<Arc<dyn SmsSender>>, status_callback_base_url: String, pause_outbound_sms: bool) -> Self {
        Self {
            pool,
            sender,
            status_callback_base_url,
            pause_outbound_sms,
        }
    }
}

#[async_trait]
impl crate::outbox::Consumer for OutboundSendConsumer {
    fn event_name_prefix(&self) -> &str {
        "conversation."
    }

    fn name(&self) -> &str {
        "conversation::outbound_send"
    }

    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome {
        if event.event_name != "conversation.OutboundQueued" {
            return ConsumerOutcome::Ok;
        }

        if self.pause_outbound_sms {
            tracing::info!(event_id = %event.event_id, "PAUSE_OUTBOUND_SMS is set, leaving message queued");
            return ConsumerOutcome::Ok;
        }

        let payload: OutboundQueuedPayload = match serde_json::from_value(event.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return ConsumerOutcome::DeadLetter {
                    reason: format!("malformed OutboundQueued payload: {e}"),
                }
            }
        };

        let row: Option<QueuedMessageRow> = match sqlx::query_as(r#" select m.body, m.status, c.caller_phone from messages m join conversations c on c.id = m.conversation_id where m.id = $1 "#)
        .bind(payload.message_id)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(r) => r,
            Err(e) => return ConsumerOutcome::Retry { reason: e.to_string() },
        };

        let Some(row) = row else {
            return ConsumerOutcome::DeadLetter {
                reason: format!("OutboundQueued referenced unknown message {}", payload.message_id),
            };
        };

        // Already sent by a prior (possibly duplicate) delivery of this
        // event — at-least-once means this is expected, not an error.
        if row.status != "queued" {
            return ConsumerOutcome::Ok;
        }

        if !compliance::can_send_to(&self.pool, event.tenant_id, &row.caller_phone)
        .await
        .unwrap_or(false)
        {
            tracing::warn!(conversation_id = %payload.conversation_id, "compliance gate denied outbound send after message was queued");
            return ConsumerOutcome::Ok;
        }

        let Some(sender) = self.sender.as_ref() else {
            return ConsumerOutcome::Retry {
                reason: "no SmsSender adapter configured".to_string(),
            };
        };

        let status_callback_url = format!("{}/webhooks/sms-status", self.status_callback_base_url);

        match sender
        .send(&row.caller_phone, &row.body, &status_callback_url, &payload.client_dedup_key)
        .await
        {
            Ok(provider_ref) => {
                match sqlx::query("update messages set status = 'sent', provider_ref = $2 where id = $1 and status = 'queued'")
                .bind(payload.message_id)
                .bind(provider_ref)
                .execute(&self.pool)
                .await
                {
                    Ok(_) => ConsumerOutcome::Ok,
                    Err(e) => ConsumerOutcome::Retry { reason: e.to_string() },
                }
            }
            Err(e) if e.is_transient() => ConsumerOutcome::Retry { reason: e.to_string() },
            Err(e) => ConsumerOutcome::DeadLetter { reason: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_orders_non_terminal_statuses_monotonically() {
        assert!(rank("queued") < rank("sent"));
        assert!(rank("sent") < rank("delivered"));
    }

    #[test]
    fn delivered_and_failed_are_both_terminal() {
        assert!(is_terminal("delivered"));
        assert!(is_terminal("failed"));
        assert!(!is_terminal("queued"));
        assert!(!is_terminal("sent"));
    }

    #[test]
    fn unknown_status_ranks_below_everything() {
        assert!(rank("bogus") < rank("queued"));
    }
}
