use thiserror::Error;

use netpilot_core::{CommandError, ErrorCode, RouterId, SessionId};

/// Failure taxonomy surfaced to the Auth/DB server.
///
/// Every variant maps onto one stable [`ErrorCode`]; the HTTP layer folds
/// these into the uniform envelope.
#[derive(Debug, Error)]
pub enum CommandsError {
    /// No session registered under this id.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The Port Manager has no lease for this router.
    #[error("unknown router: {0}")]
    UnknownRouter(RouterId),

    /// The tunnel port refused the connection; the reverse tunnel is down.
    #[error("tunnel down on port {port}: {detail}")]
    TunnelDown { port: u16, detail: String },

    /// SSH authentication to the router was rejected.
    #[error("router ssh authentication failed: {0}")]
    AuthFailed(String),

    /// The command exceeded its deadline. `mutating` drives `retryable`.
    #[error("command timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64, mutating: bool },

    /// The command ran and exited non-zero.
    #[error("command exited {exit_status}: {stderr}")]
    CommandFailed { exit_status: u32, stderr: String },

    /// Port Manager lookup failed at the transport level.
    #[error("port manager unavailable: {0}")]
    PortManager(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandsError {
    /// The stable wire code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownSession(_) => ErrorCode::UnknownSession,
            Self::UnknownRouter(_) => ErrorCode::UnknownRouter,
            Self::TunnelDown { .. } => ErrorCode::TunnelDown,
            Self::AuthFailed(_) => ErrorCode::AuthFailed,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::CommandFailed { .. } => ErrorCode::CommandFailed,
            Self::PortManager(_) | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the Auth/DB server may retry. Reads that time out or hit a
    /// flapping tunnel are retryable; a timed-out mutating command is not,
    /// because it may have executed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { mutating, .. } => !mutating,
            Self::TunnelDown { .. } | Self::PortManager(_) => true,
            _ => false,
        }
    }

    /// Fold into the envelope error shape.
    #[must_use]
    pub fn to_command_error(&self) -> CommandError {
        let err = CommandError::new(self.code(), self.to_string());
        if self.is_retryable() { err.retryable() } else { err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_retryability_depends_on_mutation() {
        let read = CommandsError::Timeout {
            elapsed_ms: 30_000,
            mutating: false,
        };
        assert!(read.is_retryable());

        let write = CommandsError::Timeout {
            elapsed_ms: 30_000,
            mutating: true,
        };
        assert!(!write.is_retryable());
        assert_eq!(write.code(), ErrorCode::Timeout);
    }

    #[test]
    fn command_failure_is_never_retryable() {
        let err = CommandsError::CommandFailed {
            exit_status: 1,
            stderr: "iptables: No chain by that name".to_owned(),
        };
        assert!(!err.is_retryable());
        let wire = err.to_command_error();
        assert_eq!(wire.code, ErrorCode::CommandFailed);
        assert!(!wire.retryable);
    }
}
