use axum::Json;
use axum::extract::State;

use netpilot_core::Device;

use crate::auth::RouterScope;
use crate::dispatch::dispatch;
use crate::error::ApiError;

use super::AppState;
use super::schemas::ok;

/// `GET /api/network/scan?routerId=` -- run a scan and upsert the results.
///
/// Each scanned device upserts its `(user, router, ip)` row; devices that
/// disappeared from the LAN are kept (no implicit deletion).
pub async fn scan(
    State(state): State<AppState>,
    scope: RouterScope,
) -> Result<Json<serde_json::Value>, ApiError> {
    let router_id = scope.router_id.clone();
    let data = dispatch(&state, &scope.session, "scan", |api, sid| async move {
        api.scan(sid, &router_id).await
    })
    .await?;

    let devices: Vec<Device> = serde_json::from_value(data)
        .map_err(|e| ApiError::Internal(format!("malformed scan data: {e}")))?;
    state
        .store
        .upsert_devices(scope.user.id, &scope.router_id, &devices)
        .await?;

    Ok(ok(devices))
}
