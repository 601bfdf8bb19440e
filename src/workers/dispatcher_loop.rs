//! Outbox dispatcher loop (, 4.7: "Outbox dispatcher
//! (already described in §4.2)"): repeatedly leases and dispatches
//! batches, backing off briefly when the queue is empty so idle
//! workers don't spin.

use std::time::Duration;

use tokio::sync::watch;

use crate::outbox::Dispatcher;

const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_millis(250);

/// Run one dispatcher worker until shutdown. `main` spawns
/// `DispatcherSettings::concurrency` of these against the same
/// `Dispatcher` so `FOR UPDATE SKIP LOCKED` fans work out across them.
pub async fn run(dispatcher: std::sync::Arc<Dispatcher>, mut shutdown: watch::Receiver<bool>) {
    loop {
        // Never cancelled mid-flight: the whole leased batch commits or
        // rolls back as one transaction, so letting it finish (rather // than racing it against `shutdown`) is what "finish the
        // current lease before exiting" means here.
        let leased = dispatcher.run_once().await;

        match leased {
            Ok(0) => {
                tokio::select! {
                    _ = tokio::time::sleep(EMPTY_QUEUE_BACKOFF) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "outbox dispatcher lease batch failed");
                tokio::select! {
                    _ = tokio::time::sleep(EMPTY_QUEUE_BACKOFF) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }
    }
}
