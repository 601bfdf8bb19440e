//! Crate-wide error taxonomy.
//!
//! Components return the narrower error types that make sense for their
//! own operations; this enum is the shared vocabulary HTTP handlers and
//! the dispatcher use to decide how to respond: reject, accept silently,
//! surface a 4xx, retry, or route to the dead-letter view.

use thiserror::Error;

/// The specific precondition that failed, carried by
/// [`NevermissError::Precondition`] so callers can map it to the right
/// status code (410 / 403 / 409 per).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionKind {
    /// A hold referenced by a booking attempt has passed its TTL.
    HoldExpired,
    /// A hold referenced by a booking attempt does not exist.
    HoldMissing,
    /// The conversation is blocked by the compliance gate.
    ConversationBlocked,
    /// The requested timeslot overlaps an existing appointment.
    BookingConflict,
    /// The resource is disabled and cannot accept new holds.
    ResourceInactive,
}

impl PreconditionKind {
    /// HTTP status code this precondition maps to.
    pub fn status_code(self) -> u16 {
        match self {
            PreconditionKind::HoldExpired => 410,
            PreconditionKind::HoldMissing => 404,
            PreconditionKind::ConversationBlocked => 403,
            PreconditionKind::BookingConflict => 409,
            PreconditionKind::ResourceInactive => 409,
        }
    }
}

/// Crate-wide error taxonomy.
#[derive(Debug, Error)]
pub enum NevermissError {
    /// Webhook signature did not verify against the provider secret.
    #[error("invalid signature")]
    InvalidSignature,

    /// The event was already processed (idempotency barrier crossed).
    #[error("duplicate event")]
    Duplicate,

    /// Input failed schema/shape validation; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// A business precondition failed; specific 4xx, caller must act.
    #[error("precondition failed: {0:?}")]
    Precondition(PreconditionKind),

    /// Upstream (carrier/calendar/composer) returned a transient failure;
    /// safe to retry per the outbox backoff policy.
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    /// Internal invariant violated; not retryable, routed to dead-letter.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Database error, generally treated as transient unless it surfaces
    /// a constraint violation we recognize as a precondition above.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl NevermissError {
    /// `true` if a dispatcher consumer should retry this error per the
    /// outbox backoff policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NevermissError::TransientUpstream(_) | NevermissError::Database(_)
        )
    }
}
