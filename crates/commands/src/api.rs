use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use netpilot_core::{
    CommandResponse, DeviceCommandRequest, DeviceMonitorRequest, ListKind, ModeCommandRequest,
    MonitorPeriod, RateCommandRequest, ResponseMetadata, RouterRequest, SessionId, SessionRequest,
};

use crate::dispatcher::Dispatcher;
use crate::error::CommandsError;
use crate::ops::RouterOp;
use crate::session::SessionRegistry;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the Axum router.
///
/// Every response is the uniform envelope with HTTP 200; the Auth/DB server
/// switches on `success` and `error.code`, not on status lines.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/session/start", post(session_start))
        .route("/session/end", post(session_end))
        .route("/session/refresh", post(session_refresh))
        .route("/network/scan", post(scan))
        .route("/block", post(block))
        .route("/unblock", post(unblock))
        .route("/whitelist/add", post(whitelist_add))
        .route("/whitelist/remove", post(whitelist_remove))
        .route("/whitelist/list", post(whitelist_list))
        .route("/whitelist/mode", post(whitelist_mode))
        .route("/whitelist/limit-rate", post(whitelist_rate))
        .route("/blacklist/add", post(blacklist_add))
        .route("/blacklist/remove", post(blacklist_remove))
        .route("/blacklist/list", post(blacklist_list))
        .route("/blacklist/mode", post(blacklist_mode))
        .route("/blacklist/limit-rate", post(blacklist_rate))
        .route("/monitor/current", post(monitor_current))
        .route("/monitor/last-week", post(monitor_last_week))
        .route("/monitor/last-month", post(monitor_last_month))
        .route("/monitor/device/{mac}", post(monitor_device))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn session_metadata(session_id: SessionId, started: Instant) -> ResponseMetadata {
    ResponseMetadata {
        router_id: None,
        session_id: Some(session_id),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

fn session_failure(err: &CommandsError, metadata: ResponseMetadata) -> CommandResponse {
    CommandResponse::fail(err.to_command_error(), metadata)
}

/// `POST /session/start` -- register a session. Idempotent.
async fn session_start(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Json<CommandResponse> {
    let started = Instant::now();
    let created = state
        .registry
        .start(request.session_id, request.restart)
        .await;
    Json(CommandResponse::ok(
        serde_json::json!({ "created": created }),
        session_metadata(request.session_id, started),
    ))
}

/// `POST /session/end` -- tear down a session and its connections. Idempotent.
async fn session_end(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Json<CommandResponse> {
    let started = Instant::now();
    let existed = state.registry.end(request.session_id).await;
    Json(CommandResponse::ok(
        serde_json::json!({ "ended": existed }),
        session_metadata(request.session_id, started),
    ))
}

/// `POST /session/refresh` -- reset the session's idle TTL.
async fn session_refresh(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Json<CommandResponse> {
    let started = Instant::now();
    let metadata = session_metadata(request.session_id, started);
    match state.registry.refresh(request.session_id).await {
        Ok(()) => Json(CommandResponse::ok(
            serde_json::json!({ "refreshed": true }),
            metadata,
        )),
        Err(err) => Json(session_failure(&err, metadata)),
    }
}

async fn scan(
    State(state): State<AppState>,
    Json(request): Json<RouterRequest>,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(request.session_id, request.router_id, RouterOp::Scan)
            .await,
    )
}

async fn block(
    State(state): State<AppState>,
    Json(request): Json<DeviceCommandRequest>,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(
                request.session_id,
                request.router_id,
                RouterOp::Block { ip: request.ip },
            )
            .await,
    )
}

async fn unblock(
    State(state): State<AppState>,
    Json(request): Json<DeviceCommandRequest>,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(
                request.session_id,
                request.router_id,
                RouterOp::Unblock { ip: request.ip },
            )
            .await,
    )
}

async fn list_add(
    state: &AppState,
    kind: ListKind,
    request: DeviceCommandRequest,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(
                request.session_id,
                request.router_id,
                RouterOp::ListAdd {
                    kind,
                    ip: request.ip,
                },
            )
            .await,
    )
}

async fn list_remove(
    state: &AppState,
    kind: ListKind,
    request: DeviceCommandRequest,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(
                request.session_id,
                request.router_id,
                RouterOp::ListRemove {
                    kind,
                    ip: request.ip,
                },
            )
            .await,
    )
}

async fn list_entries(
    state: &AppState,
    kind: ListKind,
    request: RouterRequest,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(
                request.session_id,
                request.router_id,
                RouterOp::ListEntries { kind },
            )
            .await,
    )
}

async fn list_mode(
    state: &AppState,
    kind: ListKind,
    request: ModeCommandRequest,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(
                request.session_id,
                request.router_id,
                RouterOp::SetMode {
                    kind,
                    active: request.active,
                },
            )
            .await,
    )
}

async fn list_rate(
    state: &AppState,
    kind: ListKind,
    request: RateCommandRequest,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(
                request.session_id,
                request.router_id,
                RouterOp::SetRate {
                    kind,
                    rate: request.rate,
                },
            )
            .await,
    )
}

async fn whitelist_add(
    State(state): State<AppState>,
    Json(request): Json<DeviceCommandRequest>,
) -> Json<CommandResponse> {
    list_add(&state, ListKind::Whitelist, request).await
}

async fn whitelist_remove(
    State(state): State<AppState>,
    Json(request): Json<DeviceCommandRequest>,
) -> Json<CommandResponse> {
    list_remove(&state, ListKind::Whitelist, request).await
}

async fn whitelist_list(
    State(state): State<AppState>,
    Json(request): Json<RouterRequest>,
) -> Json<CommandResponse> {
    list_entries(&state, ListKind::Whitelist, request).await
}

async fn whitelist_mode(
    State(state): State<AppState>,
    Json(request): Json<ModeCommandRequest>,
) -> Json<CommandResponse> {
    list_mode(&state, ListKind::Whitelist, request).await
}

async fn whitelist_rate(
    State(state): State<AppState>,
    Json(request): Json<RateCommandRequest>,
) -> Json<CommandResponse> {
    list_rate(&state, ListKind::Whitelist, request).await
}

async fn blacklist_add(
    State(state): State<AppState>,
    Json(request): Json<DeviceCommandRequest>,
) -> Json<CommandResponse> {
    list_add(&state, ListKind::Blacklist, request).await
}

async fn blacklist_remove(
    State(state): State<AppState>,
    Json(request): Json<DeviceCommandRequest>,
) -> Json<CommandResponse> {
    list_remove(&state, ListKind::Blacklist, request).await
}

async fn blacklist_list(
    State(state): State<AppState>,
    Json(request): Json<RouterRequest>,
) -> Json<CommandResponse> {
    list_entries(&state, ListKind::Blacklist, request).await
}

async fn blacklist_mode(
    State(state): State<AppState>,
    Json(request): Json<ModeCommandRequest>,
) -> Json<CommandResponse> {
    list_mode(&state, ListKind::Blacklist, request).await
}

async fn blacklist_rate(
    State(state): State<AppState>,
    Json(request): Json<RateCommandRequest>,
) -> Json<CommandResponse> {
    list_rate(&state, ListKind::Blacklist, request).await
}

async fn monitor_current(
    State(state): State<AppState>,
    Json(request): Json<RouterRequest>,
) -> Json<CommandResponse> {
    monitor(&state, MonitorPeriod::Current, request).await
}

async fn monitor_last_week(
    State(state): State<AppState>,
    Json(request): Json<RouterRequest>,
) -> Json<CommandResponse> {
    monitor(&state, MonitorPeriod::LastWeek, request).await
}

async fn monitor_last_month(
    State(state): State<AppState>,
    Json(request): Json<RouterRequest>,
) -> Json<CommandResponse> {
    monitor(&state, MonitorPeriod::LastMonth, request).await
}

async fn monitor(
    state: &AppState,
    period: MonitorPeriod,
    request: RouterRequest,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(
                request.session_id,
                request.router_id,
                RouterOp::Monitor { period },
            )
            .await,
    )
}

async fn monitor_device(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    Json(request): Json<DeviceMonitorRequest>,
) -> Json<CommandResponse> {
    Json(
        state
            .dispatcher
            .dispatch(
                request.session_id,
                request.router_id,
                RouterOp::MonitorDevice {
                    mac,
                    period: request.period,
                },
            )
            .await,
    )
}

/// `GET /health` -- liveness; reports the session count.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.registry.len(),
    }))
}
