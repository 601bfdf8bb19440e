//! The in-process consumer contract.

use super::envelope::OutboxEvent;

/// What a consumer did with one delivery attempt.
#[derive(Debug)]
pub enum ConsumerOutcome {
    /// The event was handled; mark it dispatched.
    Ok,
    /// Transient failure; retry per the outbox backoff policy. An
    /// optional delay hint overrides the computed jittered backoff.
    Retry { reason: String },
    /// A fatal, non-retryable failure; route straight to the
    /// dead-letter view without consuming the retry budget.
    DeadLetter { reason: String },
}

/// A registered handler for events whose `event_name` starts with
/// [`Consumer::event_name_prefix`]. Consumers are required to be
/// idempotent: delivery is at-least-once, so the same event may be
/// handed to `handle` more than once.
#[async_trait::async_trait]
pub trait Consumer: Send + Sync {
    /// Events are routed to this consumer when `event_name` starts with
    /// this prefix, e.g. `"telephony."` or `"conversation."`.
    fn event_name_prefix(&self) -> &str;

    /// Human-readable name for logging/metrics.
    fn name(&self) -> &str;

    /// Handle one delivery of `event`. Must not panic; any internal
    /// error should be translated into [`ConsumerOutcome::Retry`] or
    /// [`ConsumerOutcome::DeadLetter`].
    async fn handle(&self, event: &OutboxEvent) -> ConsumerOutcome;
}
