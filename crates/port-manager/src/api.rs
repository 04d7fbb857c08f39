use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use netpilot_core::{
    AllocateRequest, PortResponse, ReleaseRequest, ReleaseResponse, RouterId, RouterResponse,
};

use crate::allocator::PortAllocator;
use crate::error::PortError;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub allocator: Arc<PortAllocator>,
    /// Shared bearer token; compared in constant time.
    pub token: Arc<String>,
}

/// Build the Axum router with all lease routes behind the token layer.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/allocate", post(allocate))
        .route("/release", post(release))
        .route("/lookup", get(lookup))
        .route("/active", get(active))
        .route("/expire", post(expire))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject requests whose `Authorization: Bearer` token does not match.
async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(presented) = presented else {
        return PortError::Unauthorized.into_response();
    };
    if presented
        .as_bytes()
        .ct_eq(state.token.as_bytes())
        .unwrap_u8()
        != 1
    {
        return PortError::Unauthorized.into_response();
    }
    next.run(request).await
}

/// `POST /allocate` -- lease a port for a router (idempotent per router).
async fn allocate(
    State(state): State<AppState>,
    Json(request): Json<AllocateRequest>,
) -> Result<Json<PortResponse>, PortError> {
    let router_id = RouterId::parse(&request.router_id)
        .map_err(|_| PortError::InvalidRouterId(request.router_id.clone()))?;
    let port = state.allocator.allocate(&router_id).await?;
    Ok(Json(PortResponse { port }))
}

/// `POST /release` -- drop a lease by router or by port. Idempotent.
async fn release(
    State(state): State<AppState>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<ReleaseResponse>, PortError> {
    match (request.router_id, request.port) {
        (Some(raw), _) => {
            let router_id =
                RouterId::parse(&raw).map_err(|_| PortError::InvalidRouterId(raw.clone()))?;
            state.allocator.release_router(&router_id).await?;
        }
        (None, Some(port)) => {
            state.allocator.release_port(port).await?;
        }
        (None, None) => {
            return Err(PortError::InvalidRouterId(
                "release requires routerId or port".to_owned(),
            ));
        }
    }
    Ok(Json(ReleaseResponse { ok: true }))
}

/// Query parameters for `GET /lookup`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupQuery {
    router_id: Option<String>,
    port: Option<u16>,
}

/// `GET /lookup?routerId=` / `GET /lookup?port=` -- translate one to the other.
async fn lookup(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Response, PortError> {
    if let Some(raw) = query.router_id {
        let router_id =
            RouterId::parse(&raw).map_err(|_| PortError::InvalidRouterId(raw.clone()))?;
        let port = state
            .allocator
            .lookup_router(&router_id)
            .await
            .ok_or_else(|| PortError::NotFound(format!("routerId {router_id}")))?;
        return Ok(Json(PortResponse { port }).into_response());
    }
    if let Some(port) = query.port {
        let router_id = state
            .allocator
            .lookup_port(port)
            .await
            .ok_or_else(|| PortError::NotFound(format!("port {port}")))?;
        return Ok(Json(RouterResponse { router_id }).into_response());
    }
    Err(PortError::InvalidRouterId(
        "lookup requires routerId or port".to_owned(),
    ))
}

/// `GET /active` -- administrative snapshot of all leases.
async fn active(State(state): State<AppState>) -> Json<Vec<netpilot_core::PortLease>> {
    Json(state.allocator.active().await)
}

/// Body of `POST /expire`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpireRequest {
    older_than_seconds: i64,
}

/// Response of `POST /expire`.
#[derive(Debug, Serialize)]
struct ExpireResponse {
    removed: usize,
}

/// `POST /expire` -- administrative expiry of leases older than a cutoff.
async fn expire(
    State(state): State<AppState>,
    Json(request): Json<ExpireRequest>,
) -> Result<Json<ExpireResponse>, PortError> {
    let cutoff = chrono::Utc::now() - chrono::Duration::seconds(request.older_than_seconds);
    let removed = state.allocator.expire(cutoff).await?;
    Ok(Json(ExpireResponse { removed }))
}

/// `GET /health` -- liveness, unauthenticated.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
