//! Conversation engine: the per-tenant, per-caller state machine with
//! AI composer and template fallback. Exclusively owns `Conversation`
//! and `Message`.

pub mod consumer;
pub mod dedup;
pub mod engine;
pub mod state;
pub mod template;

pub use consumer::{
    CallDetectedConsumer, ComplianceUnblockConsumer, DeliveryUpdateConsumer, InboundSmsConsumer,
    OutboundSendConsumer,
};
pub use engine::ConversationRow;
pub use state::ConversationState;
