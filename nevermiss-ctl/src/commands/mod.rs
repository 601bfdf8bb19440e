//! Command implementations, one module per `nevermiss-ctl` subcommand
//! group.

pub mod migrate;
pub mod outbox;

use crate::ExitCode;

/// Errors `nevermiss-ctl` maps to a specific exit code rather than
/// the generic runtime-failure one.
#[derive(Debug, thiserror::Error)]
pub enum CtlError {
    #[error("invalid usage: {0}")]
    InvalidUsage(String),
    #[error("database unreachable: {0}")]
    Unreachable(String),
}

impl CtlError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CtlError::InvalidUsage(_) => ExitCode::InvalidUsage,
            CtlError::Unreachable(_) => ExitCode::UnreachableDependency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_usage_maps_to_exit_code_two() {
        let err = CtlError::InvalidUsage("bad flag".to_string());
        assert_eq!(err.exit_code() as i32, 2);
    }

    #[test]
    fn unreachable_maps_to_exit_code_four() {
        let err = CtlError::Unreachable("connection refused".to_string());
        assert_eq!(err.exit_code() as i32, 4);
    }
}
