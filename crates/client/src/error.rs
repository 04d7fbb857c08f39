use netpilot_core::ErrorCode;
use thiserror::Error;

/// Errors returned by the NetPilot HTTP clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Client construction failed (bad timeout, TLS setup, etc).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The request could not be sent or the connection dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// The response body did not decode as the expected shape.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The server answered with a structured error.
    #[error("api error ({code}): {message}")]
    Api {
        code: ErrorCode,
        message: String,
        retryable: bool,
    },
}

impl ClientError {
    /// Whether a retry through the shared retry helper is reasonable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Api { code, retryable, .. } => *retryable || code.is_retryable(),
            Self::Configuration(_) | Self::Deserialization(_) => false,
        }
    }

    /// The structured error code, when the server produced one.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}
