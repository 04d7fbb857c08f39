use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use netpilot_core::{ListKind, validate_ip, validate_rate};

use crate::auth::RouterScope;
use crate::dispatch::dispatch;
use crate::error::ApiError;

use super::AppState;
use super::schemas::ok;

/// `GET /api/{list}?routerId=` -- the persisted membership rows.
pub async fn entries(
    State(state): State<AppState>,
    scope: RouterScope,
    kind: ListKind,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = state
        .store
        .list_entries(kind, scope.user.id, &scope.router_id)
        .await?;
    let mode = state
        .store
        .mode_state(scope.user.id, &scope.router_id)
        .await?;
    let (active, rate) = match kind {
        ListKind::Whitelist => (mode.whitelist_active, mode.whitelist_rate),
        ListKind::Blacklist => (mode.blacklist_active, mode.blacklist_rate),
    };
    Ok(ok(serde_json::json!({
        "ips": rows.iter().map(|r| r.ip.clone()).collect::<Vec<_>>(),
        "active": active,
        "rate": rate,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EntryRequest {
    ip: String,
}

/// `POST /api/{list}/add?routerId=` -- add a device to the list.
///
/// Validation and the duplicate check run before any downstream call; the
/// row is persisted only after the router accepted the change.
pub async fn add(
    State(state): State<AppState>,
    scope: RouterScope,
    kind: ListKind,
    Json(request): Json<EntryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_ip(&request.ip).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if state
        .store
        .list_contains(kind, scope.user.id, &scope.router_id, &request.ip)
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "{} is already in the {kind}",
            request.ip
        )));
    }

    let router_id = scope.router_id.clone();
    let ip = request.ip.clone();
    dispatch(&state, &scope.session, "list_add", |api, sid| async move {
        api.list_add(kind, sid, &router_id, &ip).await
    })
    .await?;

    state
        .store
        .add_list_entry(kind, scope.user.id, &scope.router_id, &request.ip)
        .await?;
    Ok(ok(serde_json::json!({ "added": request.ip })))
}

/// `POST /api/{list}/remove?routerId=`.
pub async fn remove(
    State(state): State<AppState>,
    scope: RouterScope,
    kind: ListKind,
    Json(request): Json<EntryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_ip(&request.ip).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if !state
        .store
        .list_contains(kind, scope.user.id, &scope.router_id, &request.ip)
        .await?
    {
        return Err(ApiError::NotFound(format!(
            "{} is not in the {kind}",
            request.ip
        )));
    }

    let router_id = scope.router_id.clone();
    let ip = request.ip.clone();
    dispatch(&state, &scope.session, "list_remove", |api, sid| async move {
        api.list_remove(kind, sid, &router_id, &ip).await
    })
    .await?;

    state
        .store
        .remove_list_entry(kind, scope.user.id, &scope.router_id, &request.ip)
        .await?;
    Ok(ok(serde_json::json!({ "removed": request.ip })))
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    active: bool,
    /// When activating while the opposite mode is active, `true` swaps the
    /// modes instead of failing with `Conflict`.
    #[serde(default)]
    replace: bool,
}

/// `POST /api/{list}/mode?routerId=` -- activate or deactivate a mode.
///
/// Activating one mode while the other is active is a `Conflict` unless
/// `replace` is set, in which case the other mode is deactivated at the
/// router first. Both modes active is never persisted.
pub async fn mode(
    State(state): State<AppState>,
    scope: RouterScope,
    kind: ListKind,
    Json(request): Json<ModeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.active {
        let current = state
            .store
            .mode_state(scope.user.id, &scope.router_id)
            .await?;
        let other_active = match kind {
            ListKind::Whitelist => current.blacklist_active,
            ListKind::Blacklist => current.whitelist_active,
        };
        if other_active {
            if !request.replace {
                return Err(ApiError::Conflict(format!(
                    "{} mode is active; pass replace to swap",
                    kind.other()
                )));
            }
            let other = kind.other();
            let router_id = scope.router_id.clone();
            dispatch(&state, &scope.session, "mode_deactivate", |api, sid| async move {
                api.set_mode(other, sid, &router_id, false).await
            })
            .await?;
            state
                .store
                .set_mode_active(other, scope.user.id, &scope.router_id, false)
                .await?;
        }
    }

    let router_id = scope.router_id.clone();
    let active = request.active;
    dispatch(&state, &scope.session, "mode_set", |api, sid| async move {
        api.set_mode(kind, sid, &router_id, active).await
    })
    .await?;
    state
        .store
        .set_mode_active(kind, scope.user.id, &scope.router_id, request.active)
        .await?;

    Ok(ok(serde_json::json!({ "list": kind, "active": request.active })))
}

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    rate: i64,
}

/// `POST /api/{list}/limit-rate?routerId=` -- change the list's bandwidth
/// cap (Mbps, `1..=1000`).
pub async fn limit_rate(
    State(state): State<AppState>,
    scope: RouterScope,
    kind: ListKind,
    Json(request): Json<RateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rate = validate_rate(request.rate).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let router_id = scope.router_id.clone();
    dispatch(&state, &scope.session, "limit_rate", |api, sid| async move {
        api.set_rate(kind, sid, &router_id, rate).await
    })
    .await?;

    state
        .store
        .set_rate(kind, scope.user.id, &scope.router_id, rate)
        .await?;
    Ok(ok(serde_json::json!({ "list": kind, "rate": rate })))
}
