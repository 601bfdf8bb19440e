//! External provider adapters.
//!
//! The core never calls a carrier, calendar provider, or AI composer
//! directly — it depends on these three narrow traits, implemented by
//! adapter packages that may live outside this crate entirely. The
//! `http` submodule provides one concrete, reqwest-based implementation
//! of each so the server binary has something to wire up; production
//! deployments are expected to swap in provider-specific adapters
//! behind the same traits.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single busy interval read back from an external calendar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timeslot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Tenant catalog context handed to the composer so it can ground
/// prices and durations without inventing them (step 3: "never inventing price or duration — prices and durations are read from the catalog service").
#[derive(Debug, Clone, Serialize)]
pub struct TenantContext {
    pub tenant_id: uuid::Uuid,
    pub business_name: String,
    pub catalog: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub service_item_id: uuid::Uuid,
    pub name: String,
    pub duration_minutes: i32,
    pub price_cents: i64,
    pub currency: String,
}

/// The minimal conversation context a composer needs: nothing beyond
/// what it must ground a reply in.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    pub conversation_id: uuid::Uuid,
    pub caller_phone: String,
}

/// Sends outbound SMS through the carrier.
///
/// `send` is idempotent with respect to `dedup_key`: implementations
/// must not place two carrier-side sends for the same key, typically by
/// passing it through as the carrier's own idempotency header/param.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str, status_callback_url: &str, dedup_key: &str) -> Result<String, AdapterError>;
}

/// Reads busy ranges from / watches an external calendar (`CalendarClient`).
#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn list_busy(&self, resource_ref: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Result<Vec<Timeslot>, AdapterError>;

    async fn watch(&self, resource_ref: &str) -> Result<(), AdapterError>;
}

/// Composes a reply using an AI model grounded in tenant catalog
/// context, with a hard deadline.
#[async_trait]
pub trait Composer: Send + Sync {
    async fn compose(&self, tenant: &TenantContext, conversation: &ConversationContext, latest_inbound: &str, deadline: Duration) -> Result<String, AdapterError>;
}

/// Uniform adapter failure; the conversation/scheduling engines map
/// this to [`crate::error::NevermissError::TransientUpstream`] for the
/// outbox retry policy, except [`AdapterError::Timeout`] from a
/// composer call, which triggers template fallback instead of retry.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("upstream timeout")]
    Timeout,
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl AdapterError {
    /// `true` for 5xx/429/timeout — the class calls
    /// `TransientUpstream` and routes through the outbox retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::Timeout | AdapterError::Transport(_)
        ) || matches!(self, AdapterError::Upstream { status,.. } if *status == 429 || *status >= 500)
    }
}
