//! `nevermiss-ctl`: the minimal operational CLI surface — a migrations
//! tool, a reprocess-from-outbox command, and a dead-letter
//! list/replay command.
//!
//! Exit codes: `0` success, `2` invalid usage, `3` runtime failure,
//! `4` unreachable dependencies (database unreachable).

use clap::{Parser, Subcommand};
use uuid::Uuid;

mod commands;

/// Operational CLI for the missed-call-to-SMS relay engine.
#[derive(Parser)]
#[command(name = "nevermiss-ctl", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Schema migrations (forward and status).
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Outbox reprocessing and dead-letter operations.
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations.
    Run,
    /// Report which migrations are applied vs. pending.
    Status,
}

#[derive(Subcommand)]
enum OutboxAction {
    /// Re-enqueue already-dispatched events in an event-id range for
    /// redelivery (operator reconciliation; "Database /// transient failure" note: "operator reconciliation is assumed").
    Reprocess { #[arg(long = "from")] from: Uuid, #[arg(long = "to")] to: Uuid },
    /// Dead-letter view operations.
    #[command(subcommand)]
    DeadLetter(DeadLetterAction),
}

#[derive(Subcommand)]
enum DeadLetterAction {
    /// List events that exhausted the retry budget.
    List,
    /// Re-enqueue one dead-lettered event with a fresh attempt budget.
    Replay {
        event_id: Uuid,
    },
}

/// Exit code vocabulary.
#[repr(i32)]
pub(crate) enum ExitCode {
    Success = 0,
    InvalidUsage = 2,
    RuntimeFailure = 3,
    UnreachableDependency = 4,
}

#[tokio::main]
async fn main() {
    nevermiss::logging::init_cli();

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "nevermiss-ctl command failed");
            e.downcast_ref::<commands::CtlError>()
            .map(commands::CtlError::exit_code)
            .unwrap_or(ExitCode::RuntimeFailure)
        }
    };

    std::process::exit(code as i32);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            anyhow::Error::new(commands::CtlError::InvalidUsage(
                    "DATABASE_URL must be set".to_string()))
        })?;

    match cli.command {
        Command::Migrate { action } => match action {
            MigrateAction::Run => commands::migrate::run(&database_url).await,
            MigrateAction::Status => commands::migrate::status(&database_url).await,
        },
        Command::Outbox { action } => match action {
            OutboxAction::Reprocess { from, to } => {
                commands::outbox::reprocess(&database_url, from, to).await
            }
            OutboxAction::DeadLetter(DeadLetterAction::List) => {
                commands::outbox::dead_letter_list(&database_url).await
            }
            OutboxAction::DeadLetter(DeadLetterAction::Replay { event_id }) => {
                commands::outbox::dead_letter_replay(&database_url, event_id).await
            }
        },
    }
}
