use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use tracing::info;

use netpilot_core::RouterId;

use crate::auth::CurrentSession;
use crate::error::ApiError;

use super::AppState;
use super::schemas::ok;

/// `GET /api/settings/router-id` -- the user's active router binding.
/// `user_routers` is the single source of truth for this value.
pub async fn get_router_id(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<Json<serde_json::Value>, ApiError> {
    let router_id = state.store.active_router(current.user.id).await?;
    Ok(ok(serde_json::json!({ "routerId": router_id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindRequest {
    router_id: String,
}

/// `POST /api/settings/router-id` -- bind (or rebind) the user's router.
/// The previous binding is deactivated; one active router per user in v1.
pub async fn set_router_id(
    State(state): State<AppState>,
    current: CurrentSession,
    Json(request): Json<BindRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let router_id = RouterId::parse(&request.router_id)
        .map_err(|_| ApiError::BadRequest(format!("malformed routerId: {:?}", request.router_id)))?;
    state.store.bind_router(current.user.id, &router_id).await?;
    info!(user_id = %current.user.id, %router_id, "router bound");
    Ok(ok(serde_json::json!({ "routerId": router_id })))
}
