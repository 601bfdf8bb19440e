//! Scheduled workers: hold expiry GC, external calendar pollers, the
//! retention sweeper, the conversation inactivity closer, and the
//! outbox dispatcher loop.
//!
//! Every loop here honors a shutdown signal and finishes its
//! in-flight unit of work before exiting; no event is lost because
//! incomplete rows stay pending for the next leaseholder.

pub mod calendar_poller;
pub mod dispatcher_loop;
pub mod hold_gc;
pub mod inactivity;
pub mod retention_sweeper;

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Calls `work` once per `interval` until `shutdown` carries `true`,
/// always letting an in-flight call finish. The first tick fires
/// immediately (matches `tokio::time::interval`'s default), which is
/// the right behavior for a process that just started and may have a
/// backlog from downtime.
pub(crate) async fn run_periodic<F, Fut>(interval: Duration, mut shutdown: watch::Receiver<bool>, mut work: F) where
F: FnMut() -> Fut,
Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                work().await;
            }
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
    }
}

/// Construct a fresh shutdown channel; the sender is held by the
/// process supervisor (`main`), the receiver cloned into each worker.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}
