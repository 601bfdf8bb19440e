//! Structured logging setup using `tracing-subscriber`.
//!
//! The server process logs structured JSON to stdout, suitable for
//! container log collection; the CLI logs plain text to stderr for a
//! human watching a one-shot command. Both honor `RUST_LOG` (default
//! `info`).

use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize JSON logging for the long-running server process.
pub fn init_server() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter())
        .init();
}

/// Initialize plain-text logging for one-shot CLI subcommands.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}
