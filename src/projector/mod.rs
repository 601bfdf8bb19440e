//! Read-model projector: derives `FirstResponseTracker`,
//! `DailyKpiRollup`, and `RevenueAttribution` from the outbox stream.
//! Owns none of the source-of-truth tables; every projection here can
//! be rebuilt by replaying the outbox from the beginning.

pub mod consumer;
pub mod revenue;
pub mod rollup;
pub mod tracker;

pub use consumer::{
    AppointmentBookedConsumer, CallDetectedRollupConsumer, CallDetectedTrackerConsumer,
    ConversationProjectionConsumer, InboundSmsTrackerConsumer,
};
