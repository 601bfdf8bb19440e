//! Conversation inactivity closer (conversations
//! idle past `CONVERSATION_INACTIVITY_CLOSE_HOURS`, default 72h, close
//! automatically).

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use tokio::sync::watch;

use crate::conversation::engine;

/// Close inactive conversations every `interval` until shutdown.
pub async fn run(pool: PgPool, inactivity_threshold: ChronoDuration, interval: Duration, shutdown: watch::Receiver<bool>) {
    super::run_periodic(interval, shutdown, move || {
            let pool = pool.clone();
            async move {
                match engine::close_inactive(&pool, inactivity_threshold).await {
                    Ok(0) => {}
                    Ok(closed) => tracing::info!(closed, "closed inactive conversations"),
                    Err(e) => tracing::error!(error = %e, "inactivity sweep failed"),
                }
            }
        })
    .await;
}
