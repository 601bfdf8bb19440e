//! Inbound HTTP surface: one webhook handler per provider endpoint,
//! plus a small internal admin surface for scheduling/conversation
//! actions gated by `INTERNAL_SERVICE_KEY`.
//!
//! Handlers never await a carrier/calendar/composer call before the
//! outbox transaction they triggered has committed; webhook intake only
//! ever talks to the database. The per-request deadline is enforced by
//! a `tower` timeout layer wrapping the whole router, not inside
//! individual handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Settings;
use crate::conversation::engine;
use crate::error::NevermissError;
use crate::rng::Jitter;
use crate::scheduling::{self, hold, BookOutcome, CancelOutcome, HoldOutcome};
use crate::webhook::intake::{self, IngestOutcome};
use crate::webhook::types::{
    CalendarChangeWebhook, InboundSmsWebhook, SmsDeliveryStatusWebhook, SubscriptionChangeWebhook,
    VoiceStatusWebhook,
};
use crate::webhook::ingest_with_retry;

/// Shared handler state. Cheap to clone (everything behind `Arc` or a
/// `sqlx::PgPool`, itself an `Arc`-backed connection pool handle).
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub settings: Arc<Settings>,
    pub jitter: Arc<dyn Jitter>,
}

/// Build the full router: public webhook endpoints, the internal admin
/// surface, and a health check, wrapped in request tracing and the
/// hard webhook deadline.
pub fn app(state: AppState) -> Router {
    let deadline = state.settings.webhook_request_deadline;

    let webhooks = Router::new()
    .route("/webhooks/voice-status", post(voice_status))
    .route("/webhooks/inbound-sms", post(inbound_sms))
    .route("/webhooks/sms-status", post(sms_status))
    .route("/webhooks/calendar", post(calendar_change))
    .route("/webhooks/billing", post(billing_change));

    let internal = Router::new()
    .route("/internal/availability", get(search_availability))
    .route("/internal/holds", post(create_hold))
    .route("/internal/holds/:hold_id/book", post(book_appointment))
    .route(
        "/internal/appointments/:appointment_id/cancel",
        post(cancel_appointment))
    .route(
        "/internal/conversations/:conversation_id/take-over",
        post(take_over_conversation))
    .route(
        "/internal/conversations/:conversation_id/release",
        post(release_conversation))
    .route(
        "/internal/conversations/:conversation_id/close",
        post(close_conversation))
    .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_internal_key));

    Router::new()
    .route("/healthz", get(healthz))
    .merge(webhooks)
    .merge(internal)
    .layer(
        ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(deadline)))
    .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Rejects any internal-admin request unless it carries the configured
/// `INTERNAL_SERVICE_KEY` as a bearer token. A deployment that leaves
/// the key unset disables the whole internal surface rather than
/// leaving it open.
async fn require_internal_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: axum::middleware::Next) -> Response {
    let Some(expected) = state.settings.internal_service_key.as_deref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "internal surface not configured").into_response();
    };

    let presented = headers
    .get("authorization")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        _ => (StatusCode::UNAUTHORIZED, "invalid internal service key").into_response(),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Reconstruct the URL a provider signed over: the configured public
/// base URL, or nothing for local development against a sandbox that
/// signs bare paths.
fn signed_url(settings: &Settings, path_and_query: &str) -> String {
    format!("{}{}", settings.public_base_url, path_and_query)
}

fn signature_header(headers: &HeaderMap) -> &str {
    headers
    .get("x-nevermiss-signature")
    .and_then(|v| v.to_str().ok())
    .unwrap_or("")
}

fn outcome_response(outcome: IngestOutcome) -> Response {
    match outcome {
        IngestOutcome::Accepted | IngestOutcome::Duplicate | IngestOutcome::UnresolvedTenant => {
            // Every one of these returns 200 so the provider never
            // retries past the idempotency barrier, or past a
            // destination it will never own.
            StatusCode::OK.into_response()
        }
        IngestOutcome::InvalidSignature => StatusCode::UNAUTHORIZED.into_response(),
    }
}

macro_rules! webhook_handler {
    ($name:ident, $payload:ty, $secret:ident, $ingest:expr) => {
        async fn $name(
            State(state): State<AppState>,
            uri: axum::http::Uri,
            headers: HeaderMap,
            body: Bytes) -> Response {
            let payload: $payload = match serde_json::from_slice(&body) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed webhook body");
                    return StatusCode::BAD_REQUEST.into_response();
                }
            };

            let url = signed_url(&state.settings, &uri.to_string());
            let secret = state.settings.$secret.as_bytes();
            let signature_hex = signature_header(&headers).to_string();

            let outcome = ingest_with_retry(
                &state.pool,
                state.jitter.as_ref(),
                stringify!($name),
                state.settings.retry_max_attempts,
                state.settings.retry_backoff_cap,
                || $ingest(&state, secret, &url, &body, &signature_hex, payload.clone()))
            .await;
            outcome_response(outcome)
        }
    };
}

webhook_handler!(
    voice_status,
    VoiceStatusWebhook,
    carrier_webhook_secret,
    |state: &AppState, secret: &[u8], url: &str, body: &Bytes, sig: &str, payload: VoiceStatusWebhook| {
        let state = state.clone();
        let secret = secret.to_vec();
        let url = url.to_string();
        let body = body.to_vec();
        let sig = sig.to_string();
        async move {
            intake::ingest_voice_status(
                &state.pool,
                &secret,
                "POST",
                &url,
                &body,
                &sig,
                payload,
                chrono::Duration::from_std(state.settings.correlation_reuse_window)
                .unwrap_or(chrono::Duration::minutes(10)))
            .await
        }
    }
);

webhook_handler!(
    inbound_sms,
    InboundSmsWebhook,
    carrier_webhook_secret,
    |state: &AppState, secret: &[u8], url: &str, body: &Bytes, sig: &str, payload: InboundSmsWebhook| {
        let state = state.clone();
        let secret = secret.to_vec();
        let url = url.to_string();
        let body = body.to_vec();
        let sig = sig.to_string();
        async move {
            intake::ingest_inbound_sms(
                &state.pool,
                &secret,
                "POST",
                &url,
                &body,
                &sig,
                payload,
                chrono::Duration::from_std(state.settings.correlation_reuse_window)
                .unwrap_or(chrono::Duration::minutes(10)))
            .await
        }
    }
);

webhook_handler!(
    sms_status,
    SmsDeliveryStatusWebhook,
    carrier_webhook_secret,
    |state: &AppState, secret: &[u8], url: &str, body: &Bytes, sig: &str, payload: SmsDeliveryStatusWebhook| {
        let state = state.clone();
        let secret = secret.to_vec();
        let url = url.to_string();
        let body = body.to_vec();
        let sig = sig.to_string();
        async move {
            intake::ingest_sms_delivery_status(&state.pool, &secret, "POST", &url, &body, &sig, payload)
            .await
        }
    }
);

webhook_handler!(
    calendar_change,
    CalendarChangeWebhook,
    calendar_webhook_secret,
    |state: &AppState, secret: &[u8], url: &str, body: &Bytes, sig: &str, payload: CalendarChangeWebhook| {
        let state = state.clone();
        let secret = secret.to_vec();
        let url = url.to_string();
        let body = body.to_vec();
        let sig = sig.to_string();
        async move {
            intake::ingest_calendar_change(&state.pool, &secret, "POST", &url, &body, &sig, payload)
            .await
        }
    }
);

async fn billing_change(
    State(state): State<AppState>,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Bytes) -> Response {
    let payload: SubscriptionChangeWebhook = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "malformed billing webhook body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let url = signed_url(&state.settings, &uri.to_string());
    let secret = state.settings.billing_webhook_secret.as_bytes();
    let signature_hex = signature_header(&headers).to_string();

    // Billing customer-ref -> tenant resolution is an external
    // collaborator's contract (Non-goals, "billing // subscription mirror"); this reference deployment has no such
    // collaborator wired up, so every billing webhook resolves to no
    // tenant and is accepted as a no-op.
    let outcome = ingest_with_retry(
        &state.pool,
        state.jitter.as_ref(),
        "billing_change",
        state.settings.retry_max_attempts,
        state.settings.retry_backoff_cap,
        || {
            intake::ingest_subscription_change(
                &state.pool,
                secret,
                "POST",
                &url,
                &body,
                &signature_hex,
                payload.clone(),
                |_customer_ref| None)
        })
    .await;

    outcome_response(outcome)
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    tenant_id: Uuid,
    resource_ids: String,
    duration_minutes: i64,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
}

async fn search_availability(
    State(state): State<AppState>,
    Query(q): Query<AvailabilityQuery>) -> Response {
    let resource_ids: Result<Vec<Uuid>, _> =
    q.resource_ids.split(',').map(|s| s.parse::<Uuid>()).collect();
    let Ok(resource_ids) = resource_ids else {
        return (StatusCode::BAD_REQUEST, "invalid resource_ids").into_response();
    };

    let slots = scheduling::search_availability(
        &state.pool,
        q.tenant_id,
        &resource_ids,
        chrono::Duration::minutes(q.duration_minutes),
        q.window_start,
        q.window_end,
        chrono::Duration::from_std(state.settings.search_granularity)
        .unwrap_or(chrono::Duration::minutes(15)),
        chrono::Duration::from_std(state.settings.search_max_window)
        .unwrap_or(chrono::Duration::days(14)))
    .await;

    match slots {
        Ok(slots) => Json(slots).into_response(),
        Err(e) => database_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct CreateHoldRequest {
    tenant_id: Uuid,
    resource_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    created_by: Option<String>,
}

async fn create_hold(
    State(state): State<AppState>,
    Json(req): Json<CreateHoldRequest>) -> Response {
    let ttl = chrono::Duration::from_std(state.settings.hold_ttl).unwrap_or(chrono::Duration::minutes(15));
    match hold::create_hold(
        &state.pool,
        req.tenant_id,
        req.resource_id,
        req.start,
        req.end,
        req.created_by.as_deref(),
        ttl)
    .await
    {
        Ok(HoldOutcome::Created { hold_id, expires_at }) => {
            Json(json!({ "hold_id": hold_id, "expires_at": expires_at })).into_response()
        }
        Ok(HoldOutcome::Conflict) => (StatusCode::CONFLICT, "slot unavailable").into_response(),
        Ok(HoldOutcome::InactiveResource) => {
            (StatusCode::CONFLICT, "resource is inactive").into_response()
        }
        Err(e) => nevermiss_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct BookAppointmentRequest {
    tenant_id: Uuid,
    service_item_id: Uuid,
    customer_phone: String,
    price_cents: i64,
    currency: String,
}

async fn book_appointment(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
    Json(req): Json<BookAppointmentRequest>) -> Response {
    match hold::book_appointment(&state.pool, req.tenant_id, hold_id, req.service_item_id, &req.customer_phone, req.price_cents, &req.currency)
    .await
    {
        Ok(BookOutcome::Ok { appointment_id }) => {
            Json(json!({ "appointment_id": appointment_id })).into_response()
        }
        Ok(outcome @ (BookOutcome::HoldExpired | BookOutcome::HoldMissing | BookOutcome::Conflict)) => {
            let kind = NevermissError::Precondition(
                crate::error::PreconditionKind::from_book_outcome(&outcome)
                .unwrap_or(crate::error::PreconditionKind::BookingConflict));
            nevermiss_error_response(&kind)
        }
        Err(e) => nevermiss_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct CancelAppointmentRequest {
    tenant_id: Uuid,
}

async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<CancelAppointmentRequest>) -> Response {
    match hold::cancel_appointment(&state.pool, req.tenant_id, appointment_id).await {
        Ok(CancelOutcome::Cancelled) => StatusCode::OK.into_response(),
        Ok(CancelOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => nevermiss_error_response(&e),
    }
}

async fn take_over_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>) -> Response {
    match engine::take_over(&state.pool, conversation_id).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::CONFLICT.into_response(),
        Err(e) => database_error_response(&e),
    }
}

async fn release_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>) -> Response {
    match engine::release(&state.pool, conversation_id).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::CONFLICT.into_response(),
        Err(e) => database_error_response(&e),
    }
}

async fn close_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>) -> Response {
    match engine::close(&state.pool, conversation_id).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::CONFLICT.into_response(),
        Err(e) => database_error_response(&e),
    }
}

fn database_error_response(e: &sqlx::Error) -> Response {
    tracing::error!(error = %e, "internal endpoint database error");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

fn nevermiss_error_response(e: &NevermissError) -> Response {
    match e {
        NevermissError::Precondition(kind) => {
            let status =
            StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::CONFLICT);
            (status, format!("{kind:?}")).into_response()
        }
        NevermissError::Database(inner) => database_error_response(inner),
        other => {
            tracing::error!(error = %other, "internal endpoint error");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
