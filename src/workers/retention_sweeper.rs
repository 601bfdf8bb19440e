//! Retention sweeper: enforces each table's retention window, with the
//! archival count persisted before delete.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use tokio::sync::watch;

use crate::{outbox, retention};

/// Tuning knobs for the retention sweeper, one field per window swept.
#[derive(Debug, Clone, Copy)]
pub struct RetentionWindows {
    pub messages: ChronoDuration,
    pub receipts: ChronoDuration,
    pub outbox: ChronoDuration,
    pub conversation_metadata: ChronoDuration,
}

/// Run every retention window's sweep once per `interval` until
/// shutdown. Each sweep is its own transaction; a failure in one does
/// not block the others.
pub async fn run(pool: PgPool, windows: RetentionWindows, interval: Duration, shutdown: watch::Receiver<bool>) {
    super::run_periodic(interval, shutdown, move || {
            let pool = pool.clone();
            async move { sweep_once(&pool, windows).await }
        })
    .await;
}

async fn sweep_once(pool: &PgPool, windows: RetentionWindows) {
    match outbox::sweep_dispatched(pool, windows.outbox).await {
        Ok(n) if n > 0 => tracing::info!(archived = n, table = "outbox_events", "retention sweep"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, table = "outbox_events", "retention sweep failed"),
    }

    match retention::sweep_messages(pool, windows.messages).await {
        Ok(n) if n > 0 => tracing::info!(archived = n, table = "messages", "retention sweep"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, table = "messages", "retention sweep failed"),
    }

    match retention::sweep_receipts(pool, windows.receipts).await {
        Ok(n) if n > 0 => tracing::info!(archived = n, table = "webhook_receipts", "retention sweep"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, table = "webhook_receipts", "retention sweep failed"),
    }

    match retention::sweep_conversation_metadata(pool, windows.conversation_metadata).await {
        Ok(n) if n > 0 => tracing::info!(archived = n, table = "conversations", "retention sweep"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, table = "conversations", "retention sweep failed"),
    }
}
