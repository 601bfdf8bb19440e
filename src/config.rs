//! Process configuration.
//!
//! Every option is read once at startup into [`Settings`]. There is no
//! config file layer here — unlike the owner/agent TOML split used
//! elsewhere in this codebase's ancestry, this service is a stateless
//! multi-tenant process and all per-process tuning is environment-driven.
//! Missing required variables or unparseable values fail fast at startup
//! with a descriptive error rather than silently falling back.

use std::time::Duration;

use anyhow::{Context, Result};

/// Resolved process settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Connection string for the one relational store.
    pub database_url: String,
    /// Shared secret for intra-cluster admin-endpoint calls.
    pub internal_service_key: Option<String>,
    /// HMAC secret shared with the carrier for voice/SMS webhook
    /// signatures.
    pub carrier_webhook_secret: String,
    /// HMAC secret shared with the calendar provider for push
    /// notifications.
    pub calendar_webhook_secret: String,
    /// HMAC secret shared with the billing provider for subscription
    /// change webhooks.
    pub billing_webhook_secret: String,
    /// Scheme+host this process is publicly reachable at, prefixed onto
    /// the request path when reconstructing the URL a provider signed
    /// over. Empty means path-only, for local development behind a
    /// provider sandbox that signs bare paths.
    pub public_base_url: String,
    /// Base URL of the carrier's outbound REST API, if the built-in
    /// `HttpSmsSender` adapter is in use.
    pub carrier_api_base_url: Option<String>,
    pub carrier_api_token: Option<String>,
    /// Base URL of the calendar provider's REST API, if the built-in
    /// `HttpCalendarClient` adapter is in use.
    pub calendar_api_base_url: Option<String>,
    pub calendar_api_token: Option<String>,
    /// Base URL of the AI composer's REST API, if the built-in
    /// `HttpComposer` adapter is in use. Absent means template-only
    /// replies (no composer configured).
    pub composer_api_base_url: Option<String>,
    pub composer_api_token: Option<String>,
    /// Hold TTL (default 15 minutes).
    pub hold_ttl: Duration,
    /// Availability search granularity (default 15 minutes).
    pub search_granularity: Duration,
    /// Availability search maximum window (default 14 days).
    pub search_max_window: Duration,
    /// Outbox dispatcher lease batch size (default 100).
    pub outbox_batch_size: u32,
    /// Outbox dispatcher worker concurrency per process (default 2).
    pub outbox_concurrency: u32,
    /// Maximum delivery attempts before an event is dead-lettered (default 6).
    pub retry_max_attempts: u32,
    /// Retry backoff cap (default 30s).
    pub retry_backoff_cap: Duration,
    /// AI composer hard deadline (default 3500ms).
    pub ai_compose_deadline: Duration,
    /// Conversation inactivity close threshold (default 72h).
    pub conversation_inactivity_close: Duration,
    /// Correlation id reuse window (default 10 minutes).
    pub correlation_reuse_window: Duration,
    /// Kill switch: when true, no outbound SMS is ever sent.
    pub pause_outbound_sms: bool,
    /// First-SMS SLO threshold, used for alerting only (default 5s).
    pub first_sms_slo: Duration,
    /// Hard deadline for inbound webhook requests (default 10s).
    pub webhook_request_deadline: Duration,
    /// Hold GC worker tick interval (default 60s).
    pub hold_gc_interval: Duration,
    /// Google Calendar poller tick interval (default 60s).
    pub google_poll_interval: Duration,
    /// Jobber poller tick interval (default 120s).
    pub jobber_poll_interval: Duration,
    /// External-busy refresh window on either side of "now" (default 24h).
    pub external_sync_window: Duration,
    /// Retention sweeper tick interval (default 1h).
    pub retention_sweep_interval: Duration,
    /// Message retention window (default 180 days).
    pub message_retention: Duration,
    /// Webhook receipt retention window (default 90 days).
    pub receipt_retention: Duration,
    /// Dispatched outbox row retention window (default 30 days).
    pub outbox_retention: Duration,
    /// Closed-conversation metadata retention window (default 13 months,
    /// approximated as 395 days).
    pub conversation_metadata_retention: Duration,
}

impl Settings {
    /// Load settings from the process environment, applying the default
    /// value documented on each field above when a variable is unset.
    ///
    /// Reads a `.env` file if present (via `dotenvy`), then overlays
    /// real environment variables — explicit env always wins.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Settings {
                database_url: require_env("DATABASE_URL")?,
                internal_service_key: std::env::var("INTERNAL_SERVICE_KEY").ok(),
                carrier_webhook_secret: require_env("CARRIER_WEBHOOK_SECRET")?,
                calendar_webhook_secret: require_env("CALENDAR_WEBHOOK_SECRET")?,
                billing_webhook_secret: require_env("BILLING_WEBHOOK_SECRET")?,
                public_base_url: std::env::var("PUBLIC_BASE_URL").unwrap_or_default(),
                carrier_api_base_url: std::env::var("CARRIER_API_BASE_URL").ok(),
                carrier_api_token: std::env::var("CARRIER_API_TOKEN").ok(),
                calendar_api_base_url: std::env::var("CALENDAR_API_BASE_URL").ok(),
                calendar_api_token: std::env::var("CALENDAR_API_TOKEN").ok(),
                composer_api_base_url: std::env::var("COMPOSER_API_BASE_URL").ok(),
                composer_api_token: std::env::var("COMPOSER_API_TOKEN").ok(),
                hold_ttl: minutes("HOLD_TTL_MINUTES", 15)?,
                search_granularity: minutes("SEARCH_GRANULARITY_MINUTES", 15)?,
                search_max_window: days("SEARCH_MAX_WINDOW_DAYS", 14)?,
                outbox_batch_size: parsed("OUTBOX_BATCH_SIZE", 100)?,
                outbox_concurrency: parsed("OUTBOX_CONCURRENCY", 2)?,
                retry_max_attempts: parsed("RETRY_MAX_ATTEMPTS", 6)?,
                retry_backoff_cap: seconds("RETRY_BACKOFF_CAP_SECONDS", 30)?,
                ai_compose_deadline: millis("AI_COMPOSE_DEADLINE_MS", 3_500)?,
                conversation_inactivity_close: hours("CONVERSATION_INACTIVITY_CLOSE_HOURS", 72)?,
                correlation_reuse_window: minutes("CORRELATION_REUSE_WINDOW_MINUTES", 10)?,
                pause_outbound_sms: boolean("PAUSE_OUTBOUND_SMS", false)?,
                first_sms_slo: seconds("FIRST_SMS_SLO_SECONDS", 5)?,
                webhook_request_deadline: seconds("WEBHOOK_REQUEST_DEADLINE_SECONDS", 10)?,
                hold_gc_interval: seconds("HOLD_GC_INTERVAL_SECONDS", 60)?,
                google_poll_interval: seconds("GOOGLE_POLL_INTERVAL_SECONDS", 60)?,
                jobber_poll_interval: seconds("JOBBER_POLL_INTERVAL_SECONDS", 120)?,
                external_sync_window: hours("EXTERNAL_SYNC_WINDOW_HOURS", 24)?,
                retention_sweep_interval: seconds("RETENTION_SWEEP_INTERVAL_SECONDS", 3_600)?,
                message_retention: days("MESSAGE_RETENTION_DAYS", 180)?,
                receipt_retention: days("RECEIPT_RETENTION_DAYS", 90)?,
                outbox_retention: days("OUTBOX_RETENTION_DAYS", 30)?,
                conversation_metadata_retention: days("CONVERSATION_METADATA_RETENTION_DAYS", 395)?,
            })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required environment variable {key}"))
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid {key}={v}: {e}")),
        Err(_) => Ok(default),
    }
}

fn boolean(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(anyhow::anyhow!("invalid boolean for {key}: {other}")),
        },
        Err(_) => Ok(default),
    }
}

fn minutes(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parsed(key, default)? * 60))
}

fn hours(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parsed(key, default)? * 3600))
}

fn days(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parsed(key, default)? * 86_400))
}

fn seconds(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parsed(key, default)?))
}

fn millis(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_millis(parsed(key, default)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that
    // mutate them to avoid cross-test interference.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn set_required_secrets() {
        std::env::set_var("CARRIER_WEBHOOK_SECRET", "carrier-secret");
        std::env::set_var("CALENDAR_WEBHOOK_SECRET", "calendar-secret");
        std::env::set_var("BILLING_WEBHOOK_SECRET", "billing-secret");
    }

    #[test]
    fn missing_database_url_fails_fast() {
        let _guard = ENV_LOCK.lock().expect("lock");
        set_required_secrets();
        std::env::remove_var("DATABASE_URL");
        let err = Settings::load().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn missing_webhook_secret_fails_fast() {
        let _guard = ENV_LOCK.lock().expect("lock");
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");
        set_required_secrets();
        std::env::remove_var("CARRIER_WEBHOOK_SECRET");
        let err = Settings::load().unwrap_err();
        assert!(err.to_string().contains("CARRIER_WEBHOOK_SECRET"));
        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    fn defaults_match_spec() {
        let _guard = ENV_LOCK.lock().expect("lock");
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");
        set_required_secrets();
        for key in [
            "HOLD_TTL_MINUTES",
            "SEARCH_GRANULARITY_MINUTES",
            "SEARCH_MAX_WINDOW_DAYS",
            "OUTBOX_BATCH_SIZE",
            "OUTBOX_CONCURRENCY",
            "RETRY_MAX_ATTEMPTS",
            "RETRY_BACKOFF_CAP_SECONDS",
            "AI_COMPOSE_DEADLINE_MS",
            "CONVERSATION_INACTIVITY_CLOSE_HOURS",
            "CORRELATION_REUSE_WINDOW_MINUTES",
            "PAUSE_OUTBOUND_SMS",
            "FIRST_SMS_SLO_SECONDS",
            "WEBHOOK_REQUEST_DEADLINE_SECONDS",
            "HOLD_GC_INTERVAL_SECONDS",
            "GOOGLE_POLL_INTERVAL_SECONDS",
            "JOBBER_POLL_INTERVAL_SECONDS",
            "EXTERNAL_SYNC_WINDOW_HOURS",
            "RETENTION_SWEEP_INTERVAL_SECONDS",
            "MESSAGE_RETENTION_DAYS",
            "RECEIPT_RETENTION_DAYS",
            "OUTBOX_RETENTION_DAYS",
            "CONVERSATION_METADATA_RETENTION_DAYS",
        ] {
            std::env::remove_var(key);
        }
        let settings = Settings::load().expect("load with defaults");
        assert_eq!(settings.hold_ttl, Duration::from_secs(15 * 60));
        assert_eq!(settings.outbox_batch_size, 100);
        assert_eq!(settings.outbox_concurrency, 2);
        assert_eq!(settings.retry_max_attempts, 6);
        assert_eq!(settings.retry_backoff_cap, Duration::from_secs(30));
        assert_eq!(settings.ai_compose_deadline, Duration::from_millis(3_500));
        assert!(!settings.pause_outbound_sms);
        assert_eq!(settings.hold_gc_interval, Duration::from_secs(60));
        assert_eq!(settings.google_poll_interval, Duration::from_secs(60));
        assert_eq!(settings.jobber_poll_interval, Duration::from_secs(120));
        assert_eq!(settings.message_retention, Duration::from_secs(180 * 86_400));
        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    fn invalid_numeric_override_is_rejected() {
        let _guard = ENV_LOCK.lock().expect("lock");
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");
        set_required_secrets();
        std::env::set_var("OUTBOX_BATCH_SIZE", "not-a-number");
        let err = Settings::load().unwrap_err();
        assert!(err.to_string().contains("OUTBOX_BATCH_SIZE"));
        std::env::remove_var("OUTBOX_BATCH_SIZE");
        std::env::remove_var("DATABASE_URL");
    }
}
