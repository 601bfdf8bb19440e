//! Conversation engine core logic.
//!
//! Every function here runs against a single `sqlx::Transaction` so
//! that the outbound `Message` row and its accompanying outbox events
//! commit atomically. Adapter calls (carrier send, AI composer) never
//! happen before that commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::adapters::{Composer, ConversationContext, TenantContext};
use crate::compliance;
use crate::outbox::{self, NewEvent};

use super::dedup;
use super::state::ConversationState;
use super::template;

/// A minimal view of a `conversations` row used by engine logic.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub caller_phone: String,
    pub correlation_id: Uuid,
    pub state: String,
}

impl ConversationRow {
    pub fn state(&self) -> ConversationState {
        ConversationState::parse(&self.state).unwrap_or(ConversationState::Closed)
    }
}

/// Find the conversation currently active (open, human, or blocked)
/// for this caller, if any. Closed conversations fall outside the
/// partial uniqueness constraint and are not "active" for this lookup.
pub async fn find_active(tx: &mut Transaction<'_, Postgres>, tenant_id: Uuid, caller_phone: &str) -> Result<Option<ConversationRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        select id, tenant_id, caller_phone, correlation_id, state
        from conversations
        where tenant_id = $1 and caller_phone = $2 and state in ('open', 'human', 'blocked')
        for update
        "#)
    .bind(tenant_id)
    .bind(caller_phone)
    .fetch_optional(&mut **tx)
    .await
}

async fn create_conversation(tx: &mut Transaction<'_, Postgres>, tenant_id: Uuid, caller_phone: &str, correlation_id: Uuid, state: ConversationState) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        insert into conversations (tenant_id, caller_phone, correlation_id, state)
        values ($1, $2, $3, $4)
        returning id
        "#)
    .bind(tenant_id)
    .bind(caller_phone)
    .bind(correlation_id)
    .bind(state.as_str())
    .fetch_one(&mut **tx)
    .await
}

async fn touch_last_activity(tx: &mut Transaction<'_, Postgres>, conversation_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("update conversations set last_activity_at = now() where id = $1")
    .bind(conversation_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Ensure a conversation exists for `(tenant_id, caller_phone)`,
/// creating it in `open` or `blocked` state depending on the compliance
/// gate if none is active yet.
///
/// Returns the conversation and whether it was just created (callers use this to decide whether to send the greeting).
pub async fn ensure_conversation(tx: &mut Transaction<'_, Postgres>, tenant_id: Uuid, caller_phone: &str, correlation_id: Uuid, approved: bool) -> Result<(ConversationRow, bool), sqlx::Error> {
    if let Some(existing) = find_active(tx, tenant_id, caller_phone).await? {
        touch_last_activity(tx, existing.id).await?;
        return Ok((existing, false));
    }

    let state = if approved {
        ConversationState::Open
    } else {
        ConversationState::Blocked
    };

    let id = create_conversation(tx, tenant_id, caller_phone, correlation_id, state).await?;

    if !approved {
        outbox::append(
            &mut **tx,
            NewEvent {
                tenant_id,
                event_name: "conversation.ComplianceBlocked",
                schema_version: "1.0.0",
                payload: json!({ "conversation_id": id, "caller_phone": caller_phone, "occurred_at": Utc::now(), }),
                correlation_id,
                causation_id: None,
            })
        .await?;
    } else {
        outbox::append(
            &mut **tx,
            NewEvent {
                tenant_id,
                event_name: "conversation.ConversationStarted",
                schema_version: "1.0.0",
                payload: json!({ "conversation_id": id, "caller_phone": caller_phone, "occurred_at": Utc::now(), }),
                correlation_id,
                causation_id: None,
            })
        .await?;
    }

    Ok((ConversationRow { id, tenant_id, caller_phone: caller_phone.to_string(), correlation_id, state: state.as_str().to_string(), }, true))
}

async fn insert_inbound_message(tx: &mut Transaction<'_, Postgres>, conversation_id: Uuid, tenant_id: Uuid, body: &str) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        insert into messages (conversation_id, tenant_id, direction, body, status)
        values ($1, $2, 'in', $3, 'delivered')
        returning id
        "#)
    .bind(conversation_id)
    .bind(tenant_id)
    .bind(body)
    .fetch_one(&mut **tx)
    .await
}

async fn outbound_sequence(tx: &mut Transaction<'_, Postgres>, conversation_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "select count(*) from messages where conversation_id = $1 and direction = 'out'")
    .bind(conversation_id)
    .fetch_one(&mut **tx)
    .await
}

/// Queue an outbound message idempotently and emit the accompanying
/// outbox events, all inside `tx`. The
/// actual carrier send happens after commit, driven by the outbox
/// dispatcher.
async fn queue_outbound(tx: &mut Transaction<'_, Postgres>, conversation: &ConversationRow, body: &str) -> Result<(), sqlx::Error> {
    let sequence = outbound_sequence(tx, conversation.id).await?;
    let dedup_key = dedup::derive(conversation.tenant_id, conversation.id, sequence);

    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        insert into messages (conversation_id, tenant_id, direction, body, status, client_dedup_key)
        values ($1, $2, 'out', $3, 'queued', $4)
        on conflict (tenant_id, client_dedup_key) where direction = 'out' and client_dedup_key is not null
        do nothing
        returning id
        "#)
    .bind(conversation.id)
    .bind(conversation.tenant_id)
    .bind(body)
    .bind(&dedup_key)
    .fetch_optional(&mut **tx)
    .await?;

    // `inserted` is `None` only if a message with this dedup key already
    // exists (invariant: at most one outbound message per
    // `(tenant_id, client_dedup_key)`) — a redelivered event from the
    // outbox's at-least-once guarantee, already handled.
    let Some(message_id) = inserted else {
        return Ok(());
    };

    outbox::append(
        &mut **tx,
        NewEvent {
            tenant_id: conversation.tenant_id,
            event_name: "conversation.OutboundQueued",
            schema_version: "1.0.0",
            payload: json!({ "conversation_id": conversation.id, "message_id": message_id, "client_dedup_key": dedup_key, "occurred_at": Utc::now(), }),
            correlation_id: conversation.correlation_id,
            causation_id: None,
        })
    .await?;

    Ok(())
}

/// Compose a reply: invoke the AI composer if configured, honoring the
/// hard deadline, falling back to the template on timeout or any
/// composer error.
pub async fn compose_reply(composer: Option<&Arc<dyn Composer>>, tenant: &TenantContext, conversation: &ConversationContext, latest_inbound: &str, deadline: Duration, template_fallback: &str) -> String {
    let Some(composer) = composer else {
        return template_fallback.to_string();
    };

    match composer
    .compose(tenant, conversation, latest_inbound, deadline)
    .await
    {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "composer failed or timed out, falling back to template");
            template_fallback.to_string()
        }
    }
}

/// First-reply flow triggered by `telephony.CallDetected` or
/// `sms.InboundSmsReceived` when no conversation is yet active.
#[allow(clippy::too_many_arguments)]
pub async fn handle_first_contact(pool: &PgPool, composer: Option<&Arc<dyn Composer>>, ai_compose_deadline: Duration, tenant_id: Uuid, caller_phone: &str, correlation_id: Uuid, business_name: &str, latest_inbound: Option<&str>) -> Result<(), sqlx::Error> {
    let approved = compliance::can_send_to(pool, tenant_id, caller_phone).await?;

    let mut tx = pool.begin().await?;
    let (conversation, created) =
    ensure_conversation(&mut tx, tenant_id, caller_phone, correlation_id, approved).await?;

    if created && conversation.state() == ConversationState::Open {
        let reply = match latest_inbound {
            Some(inbound) => {
                compose_reply(
                    composer,
                    &TenantContext {
                        tenant_id,
                        business_name: business_name.to_string(),
                        catalog: Vec::new(),
                    },
                    &ConversationContext {
                        conversation_id: conversation.id,
                        caller_phone: caller_phone.to_string(),
                    },
                    inbound,
                    ai_compose_deadline,
                    &template::default_greeting(business_name))
                .await
            }
            None => template::default_greeting(business_name),
        };

        queue_outbound(&mut tx, &conversation, &reply).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Subsequent inbound message handling once a conversation is already
/// active.
#[allow(clippy::too_many_arguments)]
pub async fn handle_subsequent_inbound(pool: &PgPool, composer: Option<&Arc<dyn Composer>>, ai_compose_deadline: Duration, conversation: ConversationRow, body: &str, business_name: &str, support_phone: &str) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    insert_inbound_message(&mut tx, conversation.id, conversation.tenant_id, body).await?;
    touch_last_activity(&mut tx, conversation.id).await?;

    if template::is_stop_keyword(body) {
        compliance::record_opt_out(&mut tx, conversation.tenant_id, &conversation.caller_phone)
        .await?;
        close_conversation(&mut tx, &conversation).await?;
        tx.commit().await?;
        return Ok(());
    }

    match conversation.state() {
        ConversationState::Human => {
            // Operator drives replies; no composer invocation.
        }
        ConversationState::Blocked => {
            // Compliance gate denies the send outright.
        }
        ConversationState::Closed => {
            // Shouldn't normally reach here (closed falls outside the // active lookup), but stay a no-op rather than reopening
            // implicitly.
        }
        ConversationState::Open => {
            if template::is_help_keyword(body) {
                let allowed =
                compliance::can_send_to(pool, conversation.tenant_id, &conversation.caller_phone)
                .await
                .unwrap_or(false);
                if allowed {
                    queue_outbound(
                        &mut tx,
                        &conversation,
                        &template::default_help(business_name, support_phone))
                    .await?;
                }
            } else {
                let reply = compose_reply(
                    composer,
                    &TenantContext {
                        tenant_id: conversation.tenant_id,
                        business_name: business_name.to_string(),
                        catalog: Vec::new(),
                    },
                    &ConversationContext {
                        conversation_id: conversation.id,
                        caller_phone: conversation.caller_phone.clone(),
                    },
                    body,
                    ai_compose_deadline,
                    &template::default_greeting(business_name))
                .await;
                queue_outbound(&mut tx, &conversation, &reply).await?;
            }
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn close_conversation(tx: &mut Transaction<'_, Postgres>, conversation: &ConversationRow) -> Result<(), sqlx::Error> {
    sqlx::query("update conversations set state = 'closed', closed_at = now() where id = $1")
    .bind(conversation.id)
    .execute(&mut **tx)
    .await?;

    outbox::append(
        &mut **tx,
        NewEvent {
            tenant_id: conversation.tenant_id,
            event_name: "conversation.ConversationClosed",
            schema_version: "1.0.0",
            payload: json!({ "conversation_id": conversation.id, "occurred_at": Utc::now(), }),
            correlation_id: conversation.correlation_id,
            causation_id: None,
        })
    .await?;
    Ok(())
}

/// Explicit operator takeover: `open -> human`.
pub async fn take_over(pool: &PgPool, conversation_id: Uuid) -> Result<bool, sqlx::Error> {
    transition(pool, conversation_id, "open", ConversationState::Human).await
}

/// Explicit operator release: `human -> open`.
pub async fn release(pool: &PgPool, conversation_id: Uuid) -> Result<bool, sqlx::Error> {
    transition(pool, conversation_id, "human", ConversationState::Open).await
}

/// Explicit close from either `open` or `human`.
pub async fn close(pool: &PgPool, conversation_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        update conversations
        set state = 'closed', closed_at = now()
        where id = $1 and state in ('open', 'human')
        "#)
    .bind(conversation_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn transition(pool: &PgPool, conversation_id: Uuid, from: &str, to: ConversationState) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("update conversations set state = $3 where id = $1 and state = $2")
    .bind(conversation_id)
    .bind(from)
    .bind(to.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Close any conversation whose `last_activity_at` is older than
/// `inactivity_threshold` (72 hours by default).
/// Returns the number of conversations closed.
pub async fn close_inactive(pool: &PgPool, inactivity_threshold: chrono::Duration) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - inactivity_threshold;
    let result = sqlx::query(
        r#"
        update conversations
        set state = 'closed', closed_at = now()
        where state in ('open', 'human') and last_activity_at < $1
        "#)
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
