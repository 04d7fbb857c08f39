use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::router::RouterId;

/// An active mapping from a router to its VM-side tunnel port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortLease {
    pub router_id: RouterId,
    pub port: u16,
    pub leased_at: DateTime<Utc>,
}

/// Body of `POST /allocate`.
///
/// The id is carried raw so the Port Manager can answer a malformed value
/// with its own `InvalidRouterId` envelope instead of a generic body
/// rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateRequest {
    pub router_id: String,
}

/// Response of `POST /allocate` and `GET /lookup?routerId=`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortResponse {
    pub port: u16,
}

/// Body of `POST /release`. Exactly one of the two fields is expected;
/// releasing by router takes precedence when both are present. As with
/// [`AllocateRequest`], the id stays raw until the server validates it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Response of `POST /release`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub ok: bool,
}

/// Response of `GET /lookup?port=`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterResponse {
    pub router_id: RouterId,
}
