use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use thiserror::Error;

use netpilot_core::ErrorCode;

use crate::store::StoreError;

/// Errors surfaced by the Auth/DB server's HTTP API.
///
/// Validation and authorisation failures are produced locally and never
/// reach the Commands-Server; downstream failures arrive as `Downstream`
/// with the original code preserved.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No valid session cookie.
    #[error("authentication required")]
    Unauthenticated,

    /// OAuth succeeded but the session has not passed 2FA yet.
    #[error("two-factor verification required")]
    AuthIncomplete,

    /// The caller does not own the targeted router.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Input validation failed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Mutual-exclusion or duplicate-state violation.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Too many failed 2FA attempts.
    #[error("account locked until {until}")]
    AccountLocked { until: chrono::DateTime<Utc> },

    /// The Commands-Server reported a failure; its code is passed through.
    #[error("downstream failure ({code}): {message}")]
    Downstream { code: ErrorCode, message: String },

    /// Persistence failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The stable code carried in the error envelope.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::AuthIncomplete => ErrorCode::AuthIncomplete,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AccountLocked { .. } => ErrorCode::AccountLocked,
            Self::Downstream { code, .. } => *code,
            Self::Store(StoreError::Conflict(_)) => ErrorCode::Conflict,
            Self::Store(StoreError::NotFound(_)) => ErrorCode::NotFound,
            Self::Store(StoreError::Backend(_)) | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    fn status(&self) -> StatusCode {
        match self.code() {
            ErrorCode::Unauthenticated | ErrorCode::AuthIncomplete => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::BadRequest | ErrorCode::InvalidRouterId => StatusCode::BAD_REQUEST,
            ErrorCode::Conflict | ErrorCode::NoFreePort => StatusCode::CONFLICT,
            ErrorCode::NotFound | ErrorCode::UnknownRouter | ErrorCode::UnknownSession => {
                StatusCode::NOT_FOUND
            }
            ErrorCode::AccountLocked => StatusCode::LOCKED,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::TunnelDown | ErrorCode::AuthFailed | ErrorCode::CommandFailed => {
                StatusCode::BAD_GATEWAY
            }
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            },
            "timestamp": Utc::now().to_rfc3339(),
            // Stamped with the real elapsed time by the timing middleware.
            "executionTime": 0,
        });
        (self.status(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Forbidden("not your router".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Conflict("blacklist active".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Downstream {
                code: ErrorCode::Timeout,
                message: "deadline".into()
            }
            .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn downstream_preserves_original_code() {
        let err = ApiError::Downstream {
            code: ErrorCode::TunnelDown,
            message: "connection refused".into(),
        };
        assert_eq!(err.code(), ErrorCode::TunnelDown);
    }
}
