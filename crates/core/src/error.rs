use thiserror::Error;

/// Errors produced by the core validation helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The router identifier is empty or not twelve lowercase hex chars.
    #[error("invalid router id: {0:?}")]
    InvalidRouterId(String),

    /// The session identifier is not a valid UUID.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// The value is not a valid dotted-quad IPv4 address.
    #[error("invalid ip address: {0:?}")]
    InvalidIp(String),

    /// The value is not a recognisable MAC address.
    #[error("invalid mac address: {0:?}")]
    InvalidMac(String),

    /// The rate limit is outside the accepted `1..=1000` range.
    #[error("rate out of range (1..=1000): {0}")]
    RateOutOfRange(i64),
}
