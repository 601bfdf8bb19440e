//! Reqwest-backed adapter implementations, with a 2s connect timeout
//! and a 10s total timeout on every outbound adapter call.
//!
//! These are reference implementations against a generic REST shape;
//! a real deployment swaps in the carrier/calendar/LLM provider's own
//! client behind the same traits without touching the core.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{AdapterError, CalendarClient, Timeslot};

fn client() -> Client {
    Client::builder()
    .connect_timeout(Duration::from_secs(2))
    .timeout(Duration::from_secs(10))
    .build()
    .expect("reqwest client configuration is static and valid")
}

fn map_transport(e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Timeout
    } else {
        AdapterError::Transport(e.to_string())
    }
}

async fn map_response(resp: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(AdapterError::Upstream { status, body })
    }
}

/// Posts outbound SMS to a carrier REST endpoint, passing `dedup_key`
/// as an idempotency header so carrier-side retries never double-send.
pub struct HttpSmsSender {
    base_url: String,
    auth_token: String,
    http: Client,
}

impl HttpSmsSender {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: auth_token.into(),
            http: client(),
        }
    }
}

#[derive(Deserialize)]
struct SendResponse {
    provider_ref: String,
}

#[async_trait]
impl super::SmsSender for HttpSmsSender {
    async fn send(&self, to: &str, body: &str, status_callback_url: &str, dedup_key: &str) -> Result<String, AdapterError> {
        let resp = self
        .http
        .post(format!("{}/messages", self.base_url))
        .bearer_auth(&self.auth_token)
        .header("Idempotency-Key", dedup_key)
        .json(&serde_json::json!({ "to": to, "body": body, "status_callback_url": status_callback_url, }))
        .send()
        .await
        .map_err(map_transport)?;

        let resp = map_response(resp).await?;
        let parsed: SendResponse = resp.json().await.map_err(map_transport)?;
        Ok(parsed.provider_ref)
    }
}

/// Reads busy ranges from / registers a watch with an external
/// calendar's REST API.
pub struct HttpCalendarClient {
    base_url: String,
    auth_token: String,
    http: Client,
}

impl HttpCalendarClient {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: auth_token.into(),
            http: client(),
        }
    }
}

#[derive(Deserialize)]
struct BusyResponse {
    busy: Vec<Timeslot>,
}

#[async_trait]
impl CalendarClient for HttpCalendarClient {
    async fn list_busy(&self, resource_ref: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Result<Vec<Timeslot>, AdapterError> {
        let resp = self
        .http
        .get(format!("{}/calendars/{resource_ref}/busy", self.base_url))
        .bearer_auth(&self.auth_token)
        .query(&[("start", window_start.to_rfc3339()), ("end", window_end.to_rfc3339())])
        .send()
        .await
        .map_err(map_transport)?;

        let resp = map_response(resp).await?;
        let parsed: BusyResponse = resp.json().await.map_err(map_transport)?;
        Ok(parsed.busy)
    }

    async fn watch(&self, resource_ref: &str) -> Result<(), AdapterError> {
        let resp = self
        .http
        .post(format!("{}/calendars/{resource_ref}/watch", self.base_url))
        .bearer_auth(&self.auth_token)
        .send()
        .await
        .map_err(map_transport)?;
        map_response(resp).await?;
        Ok(())
    }
}

/// Calls a hosted LLM endpoint to compose a reply, enforcing the hard
/// deadline itself so the
/// conversation engine's fallback-to-template path is a simple `Err`
/// match rather than a second timeout layer.
pub struct HttpComposer {
    base_url: String,
    auth_token: String,
    http: Client,
}

impl HttpComposer {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: auth_token.into(),
            http: client(),
        }
    }
}

#[derive(Deserialize)]
struct ComposeResponse {
    text: String,
}

#[async_trait]
impl super::Composer for HttpComposer {
    async fn compose(&self, tenant: &super::TenantContext, conversation: &super::ConversationContext, latest_inbound: &str, deadline: Duration) -> Result<String, AdapterError> {
        let call = async {
            let resp = self
            .http
            .post(format!("{}/compose", self.base_url))
            .bearer_auth(&self.auth_token)
            .json(&serde_json::json!({ "tenant": tenant, "conversation": conversation, "latest_inbound": latest_inbound, }))
            .send()
            .await
            .map_err(map_transport)?;

            let resp = map_response(resp).await?;
            let parsed: ComposeResponse = resp.json().await.map_err(map_transport)?;
            Ok(parsed.text)
        };

        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout),
        }
    }
}
