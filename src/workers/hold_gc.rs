//! Hold GC worker: deletes expired holds and frees the slot they held.

use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;

use crate::scheduling;

/// Run the hold-expiry sweep every `interval` until shutdown.
pub async fn run(pool: PgPool, interval: Duration, shutdown: watch::Receiver<bool>) {
    super::run_periodic(interval, shutdown, move || {
            let pool = pool.clone();
            async move {
                match scheduling::expire_holds(&pool).await {
                    Ok(0) => {}
                    Ok(released) => tracing::info!(released, "hold GC released expired holds"),
                    Err(e) => tracing::error!(error = %e, "hold GC sweep failed"),
                }
            }
        })
    .await;
}
