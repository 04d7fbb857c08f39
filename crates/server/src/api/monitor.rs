use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use netpilot_core::{MonitorPeriod, normalize_mac};

use crate::auth::RouterScope;
use crate::dispatch::dispatch;
use crate::error::ApiError;

use super::AppState;
use super::schemas::ok;

async fn aggregate(
    state: AppState,
    scope: RouterScope,
    period: MonitorPeriod,
) -> Result<Json<serde_json::Value>, ApiError> {
    let router_id = scope.router_id.clone();
    let data = dispatch(&state, &scope.session, "monitor", |api, sid| async move {
        api.monitor(period, sid, &router_id).await
    })
    .await?;
    Ok(ok(data))
}

/// `GET /api/monitor/current?routerId=`.
pub async fn current(
    State(state): State<AppState>,
    scope: RouterScope,
) -> Result<Json<serde_json::Value>, ApiError> {
    aggregate(state, scope, MonitorPeriod::Current).await
}

/// `GET /api/monitor/last-week?routerId=`.
pub async fn last_week(
    State(state): State<AppState>,
    scope: RouterScope,
) -> Result<Json<serde_json::Value>, ApiError> {
    aggregate(state, scope, MonitorPeriod::LastWeek).await
}

/// `GET /api/monitor/last-month?routerId=`.
pub async fn last_month(
    State(state): State<AppState>,
    scope: RouterScope,
) -> Result<Json<serde_json::Value>, ApiError> {
    aggregate(state, scope, MonitorPeriod::LastMonth).await
}

#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    period: Option<MonitorPeriod>,
}

/// `GET /api/monitor/device/{mac}?routerId=&period=`.
pub async fn device(
    State(state): State<AppState>,
    scope: RouterScope,
    Path(mac): Path<String>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mac = normalize_mac(&mac).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let period = query.period.unwrap_or(MonitorPeriod::Current);

    let router_id = scope.router_id.clone();
    let mac_arg = mac.clone();
    let data = dispatch(&state, &scope.session, "monitor_device", |api, sid| async move {
        api.monitor_device(sid, &router_id, &mac_arg, period).await
    })
    .await?;
    Ok(ok(data))
}
