use serde::{Deserialize, Serialize};

use crate::router::{RouterId, SessionId};

/// Stable error discriminators carried in the uniform envelope.
///
/// Clients switch on the code, never on the message, so the serialised
/// form is part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No valid session credential was presented.
    Unauthenticated,
    /// OAuth succeeded but 2FA verification is still pending.
    AuthIncomplete,
    /// The caller does not own the targeted router.
    Forbidden,
    /// Input validation failed.
    BadRequest,
    /// Mutual-exclusion or duplicate-state violation.
    Conflict,
    NotFound,
    /// The port range is exhausted.
    NoFreePort,
    /// The router identifier is empty or malformed.
    InvalidRouterId,
    /// The Commands-Server has no session with this id.
    UnknownSession,
    /// The Commands-Server cannot resolve the router's tunnel port.
    UnknownRouter,
    /// The reverse tunnel is not accepting connections.
    TunnelDown,
    /// SSH authentication to the router failed.
    AuthFailed,
    /// The operation exceeded its deadline.
    Timeout,
    /// The router command exited non-zero.
    CommandFailed,
    /// Too many failed 2FA attempts; the account is temporarily locked.
    AccountLocked,
    Internal,
}

impl ErrorCode {
    /// Whether an operation failing with this code is safe to retry.
    ///
    /// Only transient transport-level failures qualify; mutating commands
    /// are never auto-retried regardless.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TunnelDown | Self::Timeout | Self::Internal)
    }

    /// The stable string form, identical to the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "Unauthenticated",
            Self::AuthIncomplete => "AuthIncomplete",
            Self::Forbidden => "Forbidden",
            Self::BadRequest => "BadRequest",
            Self::Conflict => "Conflict",
            Self::NotFound => "NotFound",
            Self::NoFreePort => "NoFreePort",
            Self::InvalidRouterId => "InvalidRouterId",
            Self::UnknownSession => "UnknownSession",
            Self::UnknownRouter => "UnknownRouter",
            Self::TunnelDown => "TunnelDown",
            Self::AuthFailed => "AuthFailed",
            Self::Timeout => "Timeout",
            Self::CommandFailed => "CommandFailed",
            Self::AccountLocked => "AccountLocked",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail inside a failed envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    /// Whether the caller may safely retry the operation. Absent means `false`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl CommandError {
    /// Create a non-retryable error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    /// Mark the error as retryable.
    #[must_use]
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

/// Correlation metadata attached to every envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub router_id: Option<RouterId>,
    pub session_id: Option<SessionId>,
    pub duration_ms: u64,
}

/// The uniform `{success, data?, error?, metadata}` envelope returned by
/// every Commands-Server operation and, externally, by every dashboard
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
    pub metadata: ResponseMetadata,
}

impl CommandResponse {
    /// Build a success envelope.
    #[must_use]
    pub fn ok(data: serde_json::Value, metadata: ResponseMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata,
        }
    }

    /// Build a failure envelope.
    #[must_use]
    pub fn fail(error: CommandError, metadata: ResponseMetadata) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            metadata,
        }
    }

    /// The error code, if this is a failure envelope.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ResponseMetadata {
        ResponseMetadata {
            router_id: Some(RouterId::parse("aabbccddeeff").unwrap()),
            session_id: Some(SessionId::new()),
            duration_ms: 12,
        }
    }

    #[test]
    fn error_code_serialises_as_stable_string() {
        let json = serde_json::to_string(&ErrorCode::NoFreePort).unwrap();
        assert_eq!(json, "\"NoFreePort\"");
        let back: ErrorCode = serde_json::from_str("\"TunnelDown\"").unwrap();
        assert_eq!(back, ErrorCode::TunnelDown);
    }

    #[test]
    fn success_envelope_shape() {
        let resp = CommandResponse::ok(serde_json::json!({"devices": []}), meta());
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["success"], true);
        assert!(v.get("error").is_none());
        assert_eq!(v["metadata"]["durationMs"], 12);
    }

    #[test]
    fn failure_envelope_carries_code_and_retryable() {
        let resp = CommandResponse::fail(
            CommandError::new(ErrorCode::Timeout, "deadline exceeded").retryable(),
            meta(),
        );
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "Timeout");
        assert_eq!(v["error"]["retryable"], true);
        assert!(v.get("data").is_none());
    }

    #[test]
    fn retryable_is_omitted_when_false() {
        let resp = CommandResponse::fail(
            CommandError::new(ErrorCode::CommandFailed, "exit 1"),
            meta(),
        );
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v["error"].get("retryable").is_none());
    }
}
