use serde::{Deserialize, Serialize};

use crate::router::{RouterId, SessionId};

/// Which of the two access-control lists an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Whitelist,
    Blacklist,
}

impl ListKind {
    /// The opposite list.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Whitelist => Self::Blacklist,
            Self::Blacklist => Self::Whitelist,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whitelist => "whitelist",
            Self::Blacklist => "blacklist",
        }
    }
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation window for bandwidth monitoring queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorPeriod {
    Current,
    LastWeek,
    LastMonth,
}

impl MonitorPeriod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::LastWeek => "last-week",
            Self::LastMonth => "last-month",
        }
    }
}

/// Session lifecycle request (`/session/start`, `/session/end`,
/// `/session/refresh`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub session_id: SessionId,
    /// On `/session/start`, tear down any existing state under this id first.
    #[serde(default)]
    pub restart: bool,
}

/// Common request body for router-scoped commands: every command carries the
/// session and the target router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterRequest {
    pub session_id: SessionId,
    pub router_id: RouterId,
}

/// Request body for list-membership and block/unblock commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommandRequest {
    pub session_id: SessionId,
    pub router_id: RouterId,
    pub ip: String,
}

/// Request body for mode activation/deactivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeCommandRequest {
    pub session_id: SessionId,
    pub router_id: RouterId,
    pub active: bool,
}

/// Request body for rate-limit changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateCommandRequest {
    pub session_id: SessionId,
    pub router_id: RouterId,
    pub rate: u16,
}

/// Request body for per-device monitor queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMonitorRequest {
    pub session_id: SessionId,
    pub router_id: RouterId,
    pub mac: String,
    pub period: MonitorPeriod,
}

/// Per-device bandwidth counters reported by monitor commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandwidthUsage {
    pub mac: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_request_uses_camel_case_wire_names() {
        let req = RouterRequest {
            session_id: SessionId::new(),
            router_id: RouterId::parse("aabbccddeeff").unwrap(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("sessionId").is_some());
        assert_eq!(v["routerId"], "aabbccddeeff");
    }

    #[test]
    fn restart_defaults_to_false() {
        let raw = format!("{{\"sessionId\":\"{}\"}}", SessionId::new());
        let req: SessionRequest = serde_json::from_str(&raw).unwrap();
        assert!(!req.restart);
    }

    #[test]
    fn monitor_period_wire_form() {
        assert_eq!(
            serde_json::to_string(&MonitorPeriod::LastWeek).unwrap(),
            "\"last-week\""
        );
    }

    #[test]
    fn list_kind_other_flips() {
        assert_eq!(ListKind::Whitelist.other(), ListKind::Blacklist);
        assert_eq!(ListKind::Blacklist.other(), ListKind::Whitelist);
    }
}
