//! External calendar pollers, one per connected external calendar,
//! reconciling the shadow busy table. This is the fallback path for
//! resources whose provider doesn't push change notifications (or
//! whose push notification was missed) — push notifications are the
//! primary path, polling the fallback.
//!
//! One poller instance runs per external source (`google`, `jobber`),
//! each on its own tick interval (`GOOGLE_POLL_INTERVAL_SECONDS` /
//! `JOBBER_POLL_INTERVAL_SECONDS`) and filtering to resources that
//! mirror that source's calendars.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;

use crate::adapters::CalendarClient;
use crate::scheduling::external_sync;

/// Poll every resource mirroring `source`'s calendars every `interval`,
/// refreshing the shadow busy table within `+/- window` of now.
pub async fn run(pool: PgPool, calendar: Arc<dyn CalendarClient>, source: &'static str, interval: Duration, window: chrono::Duration, shutdown: watch::Receiver<bool>) {
    super::run_periodic(interval, shutdown, move || {
            let pool = pool.clone();
            let calendar = Arc::clone(&calendar);
            async move {
                poll_once(&pool, calendar.as_ref(), source, window).await;
            }
        })
    .await;
}

async fn poll_once(pool: &PgPool, calendar: &dyn CalendarClient, source: &str, window: chrono::Duration) {
    let resources = match external_sync::all_external_resources(pool).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, source, "calendar poller failed to list resources");
            return;
        }
    };

    for resource in resources.iter().filter(|r| r.external_source == source) {
        if let Err(e) = external_sync::refresh(pool, calendar, resource, window).await {
            tracing::error!(error = %e, resource_id = %resource.id, source, "calendar poller refresh failed");
        }
    }
}
