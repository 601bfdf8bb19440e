//! Missed-call-to-SMS relay engine.
//!
//! Converts missed calls and inbound texts into structured SMS
//! conversations. This crate holds the tenant-scoped event spine: webhook
//! intake, the transactional outbox, the conversation state machine, the
//! scheduling/booking engine, the compliance gate, and the read-model
//! projector. HTTP endpoint plumbing for the product UI, admin CRUD, and
//! identity/RBAC are external collaborators and live outside this crate.

pub mod adapters;
pub mod clock;
pub mod compliance;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
pub mod outbox;
pub mod projector;
pub mod retention;
pub mod rng;
pub mod scheduling;
pub mod tenant;
pub mod webhook;
pub mod workers;

pub use error::{NevermissError, PreconditionKind};
