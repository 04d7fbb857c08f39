use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Stable opaque identifier for a physical router.
///
/// Derived from the router's primary LAN MAC address by lower-casing and
/// stripping separators, so the same device always produces the same id.
/// Deserialization validates, so a malformed id never crosses a process
/// boundary unnoticed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RouterId(String);

impl<'de> Deserialize<'de> for RouterId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl RouterId {
    /// Derive a router id from a raw MAC address string.
    ///
    /// Accepts any of the common notations (`AA:BB:CC:11:22:33`,
    /// `aa-bb-cc-11-22-33`, `aabbcc112233`) and normalises to twelve
    /// lowercase hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRouterId`] if the input does not contain
    /// exactly twelve hex digits.
    pub fn from_mac(raw: &str) -> Result<Self, CoreError> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::parse(&normalized)
    }

    /// Parse an already-normalised router id (twelve lowercase hex chars).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRouterId`] on empty or malformed input.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.len() != 12 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidRouterId(raw.to_owned()));
        }
        if trimmed.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(CoreError::InvalidRouterId(raw.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// The opaque string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RouterId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Server-minted session handle.
///
/// Issued by the Auth/DB server on login and mirrored to the Commands-Server
/// so both sides agree on which sessions exist. Always a freshly generated
/// UUID, never derived from a user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a new session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::InvalidSessionId(s.to_owned()))
    }
}
