use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use netpilot_core::{CommandError, ErrorCode};

/// Errors produced by the Port Manager.
#[derive(Debug, Error)]
pub enum PortError {
    /// The router identifier is empty or malformed.
    #[error("invalid router id: {0}")]
    InvalidRouterId(String),

    /// Every port in the configured range is leased.
    #[error("no free port in range {min}..={max}")]
    NoFreePort { min: u16, max: u16 },

    /// No lease matches the lookup.
    #[error("no lease found for {0}")]
    NotFound(String),

    /// The durable lease store failed.
    #[error("lease store error: {0}")]
    Store(String),

    /// A required configuration value is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The bearer token is missing or wrong.
    #[error("unauthorized")]
    Unauthorized,
}

impl PortError {
    /// The stable code surfaced on the wire.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRouterId(_) => ErrorCode::InvalidRouterId,
            Self::NoFreePort { .. } => ErrorCode::NoFreePort,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Store(_) | Self::Config(_) | Self::Io(_) => ErrorCode::Internal,
            Self::Unauthorized => ErrorCode::Unauthenticated,
        }
    }
}

impl IntoResponse for PortError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidRouterId(_) => StatusCode::BAD_REQUEST,
            Self::NoFreePort { .. } => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(_) | Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        };
        let body = serde_json::json!({
            "error": CommandError::new(self.code(), self.to_string()),
        });
        (status, axum::Json(body)).into_response()
    }
}
