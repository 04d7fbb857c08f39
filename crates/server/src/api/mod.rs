pub mod auth;
pub mod lists;
pub mod monitor;
pub mod network;
pub mod schemas;
pub mod session;
pub mod settings;
pub mod twofa;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{FromRef, Request};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum_extra::extract::cookie::Key;
use tower_http::trace::TraceLayer;

use netpilot_client::CommandsApi;
use netpilot_core::ListKind;

use crate::auth::OAuthProvider;
use crate::store::UserStore;
use crate::twofactor::TwoFactorService;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub commands: Arc<dyn CommandsApi>,
    pub oauth: Arc<dyn OAuthProvider>,
    pub twofactor: Arc<TwoFactorService>,
    /// Key signing the session and OAuth-state cookies.
    pub cookie_key: Key,
    /// Lifetime of a freshly issued session.
    pub session_ttl: chrono::Duration,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Key {
        state.cookie_key.clone()
    }
}

/// Build the Axum router with all API routes and middleware.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/login", get(auth::login))
        .route("/authorize", get(auth::authorize))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/health", get(health))
        .route("/api/2fa/setup/start", post(twofa::setup_start))
        .route("/api/2fa/setup/verify", post(twofa::setup_verify))
        .route("/api/2fa/verify", post(twofa::verify))
        .route("/api/2fa/disable", post(twofa::disable))
        .route("/api/2fa/status", get(twofa::status))
        .route("/api/session/start", post(session::start))
        .route("/api/session/end", post(session::end))
        .route("/api/session/refresh", post(session::refresh))
        .route("/api/network/scan", get(network::scan))
        .route("/api/monitor/current", get(monitor::current))
        .route("/api/monitor/last-week", get(monitor::last_week))
        .route("/api/monitor/last-month", get(monitor::last_month))
        .route("/api/monitor/device/{mac}", get(monitor::device))
        .route(
            "/api/settings/router-id",
            get(settings::get_router_id).post(settings::set_router_id),
        );

    for kind in [ListKind::Whitelist, ListKind::Blacklist] {
        app = add_list_routes(app, kind);
    }

    app.layer(middleware::from_fn(stamp_error_timing))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire the five list endpoints for one [`ListKind`]; both lists share the
/// same handlers.
fn add_list_routes(router: Router<AppState>, kind: ListKind) -> Router<AppState> {
    use axum::Json;
    use axum::extract::State;

    use crate::auth::RouterScope;

    router
        .route(
            &format!("/api/{kind}"),
            get(move |state: State<AppState>, scope: RouterScope| {
                lists::entries(state, scope, kind)
            }),
        )
        .route(
            &format!("/api/{kind}/add"),
            post(
                move |state: State<AppState>, scope: RouterScope, body: Json<lists::EntryRequest>| {
                    lists::add(state, scope, kind, body)
                },
            ),
        )
        .route(
            &format!("/api/{kind}/remove"),
            post(
                move |state: State<AppState>, scope: RouterScope, body: Json<lists::EntryRequest>| {
                    lists::remove(state, scope, kind, body)
                },
            ),
        )
        .route(
            &format!("/api/{kind}/mode"),
            post(
                move |state: State<AppState>, scope: RouterScope, body: Json<lists::ModeRequest>| {
                    lists::mode(state, scope, kind, body)
                },
            ),
        )
        .route(
            &format!("/api/{kind}/limit-rate"),
            post(
                move |state: State<AppState>, scope: RouterScope, body: Json<lists::RateRequest>| {
                    lists::limit_rate(state, scope, kind, body)
                },
            ),
        )
}

/// `GET /health` -- liveness.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "ok"}))
}

/// Stamp failed envelopes with `executionTime` (milliseconds spent in the
/// handler chain). Success bodies pass through untouched.
async fn stamp_error_timing(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let response = next.run(request).await;
    if response.status().is_success() {
        return response;
    }
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, 1 << 20).await else {
        return Response::from_parts(parts, Body::empty());
    };
    let patched = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(mut value) if value.get("success") == Some(&serde_json::Value::Bool(false)) => {
            value["executionTime"] = serde_json::json!(
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
            );
            serde_json::to_vec(&value).unwrap_or_else(|_| bytes.to_vec())
        }
        _ => bytes.to_vec(),
    };
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(patched))
}
