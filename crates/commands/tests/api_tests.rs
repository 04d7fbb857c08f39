use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use tower::ServiceExt;

use netpilot_commands::{
    AppState, CommandsError, Deadlines, Dispatcher, PortResolver, RouterShell, SessionRegistry,
    ShellConnector, ShellOutput, router,
};
use netpilot_core::{RouterId, SessionId};

// -- Scripted shell --------------------------------------------------------

const ARP: &str = "IP address       HW type     Flags       HW address            Mask     Device\n\
192.168.1.10     0x1         0x2         aa:bb:cc:11:22:33     *        br-lan\n";

const LEASES: &str = "1692001234 aa:bb:cc:11:22:33 192.168.1.10 phone 01:aa:bb:cc:11:22:33\n";

struct ScriptedShell {
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl RouterShell for ScriptedShell {
    async fn exec(&self, command: &str) -> Result<ShellOutput, CommandsError> {
        let stdout = if command.contains("dhcp.leases") {
            LEASES.to_owned()
        } else if command.contains("/proc/net/arp") {
            ARP.to_owned()
        } else {
            String::new()
        };
        Ok(ShellOutput {
            exit_status: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct ScriptedConnector {
    connects: Arc<AtomicU32>,
    last_closed: Arc<AtomicBool>,
}

#[async_trait]
impl ShellConnector for ScriptedConnector {
    async fn connect(&self, _port: u16) -> Result<Arc<dyn RouterShell>, CommandsError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.last_closed.store(false, Ordering::SeqCst);
        Ok(Arc::new(ScriptedShell {
            closed: Arc::clone(&self.last_closed),
        }))
    }
}

struct FixedResolver {
    ports: HashMap<RouterId, u16>,
}

#[async_trait]
impl PortResolver for FixedResolver {
    async fn resolve(&self, router_id: &RouterId) -> Result<Option<u16>, CommandsError> {
        Ok(self.ports.get(router_id).copied())
    }
}

// -- Helpers ---------------------------------------------------------------

struct Fixture {
    app: axum::Router,
    connects: Arc<AtomicU32>,
    last_closed: Arc<AtomicBool>,
}

fn build_fixture() -> Fixture {
    let registry = Arc::new(SessionRegistry::new());
    let connects = Arc::new(AtomicU32::new(0));
    let last_closed = Arc::new(AtomicBool::new(false));

    let mut ports = HashMap::new();
    ports.insert(RouterId::parse("aabbccddeeff").unwrap(), 2201);

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::new(FixedResolver { ports }),
        Arc::new(ScriptedConnector {
            connects: Arc::clone(&connects),
            last_closed: Arc::clone(&last_closed),
        }),
        Deadlines::default(),
    ));

    let app = router(AppState {
        registry,
        dispatcher,
    });
    Fixture {
        app,
        connects,
        last_closed,
    }
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn start_session(app: &axum::Router, session_id: SessionId) {
    let response = app
        .clone()
        .oneshot(post_json(
            "/session/start",
            serde_json::json!({ "sessionId": session_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// -- Tests -----------------------------------------------------------------

#[tokio::test]
async fn health_reports_session_count() {
    let fixture = build_fixture();
    let response = fixture
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["sessions"], 0);
}

#[tokio::test]
async fn session_start_is_idempotent() {
    let fixture = build_fixture();
    let session_id = SessionId::new();

    let first = fixture
        .app
        .clone()
        .oneshot(post_json(
            "/session/start",
            serde_json::json!({ "sessionId": session_id }),
        ))
        .await
        .unwrap();
    let first = body_json(first).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["created"], true);

    let second = fixture
        .app
        .oneshot(post_json(
            "/session/start",
            serde_json::json!({ "sessionId": session_id }),
        ))
        .await
        .unwrap();
    let second = body_json(second).await;
    assert_eq!(second["success"], true);
    assert_eq!(second["data"]["created"], false);
}

#[tokio::test]
async fn scan_returns_devices_in_envelope() {
    let fixture = build_fixture();
    let session_id = SessionId::new();
    start_session(&fixture.app, session_id).await;

    let response = fixture
        .app
        .oneshot(post_json(
            "/network/scan",
            serde_json::json!({ "sessionId": session_id, "routerId": "aabbccddeeff" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], true, "unexpected body: {body}");
    let devices = body["data"].as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["ip"], "192.168.1.10");
    assert_eq!(devices[0]["mac"], "AA:BB:CC:11:22:33");
    assert_eq!(devices[0]["hostname"], "phone");
    assert_eq!(body["metadata"]["routerId"], "aabbccddeeff");
}

#[tokio::test]
async fn command_without_session_is_unknown_session() {
    let fixture = build_fixture();
    let response = fixture
        .app
        .oneshot(post_json(
            "/network/scan",
            serde_json::json!({ "sessionId": SessionId::new(), "routerId": "aabbccddeeff" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UnknownSession");
    assert_eq!(fixture.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn command_for_unleased_router_is_unknown_router() {
    let fixture = build_fixture();
    let session_id = SessionId::new();
    start_session(&fixture.app, session_id).await;

    let response = fixture
        .app
        .oneshot(post_json(
            "/whitelist/add",
            serde_json::json!({
                "sessionId": session_id,
                "routerId": "ffeeddccbbaa",
                "ip": "192.168.1.10"
            }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UnknownRouter");
}

#[tokio::test]
async fn session_end_closes_pooled_connections() {
    let fixture = build_fixture();
    let session_id = SessionId::new();
    start_session(&fixture.app, session_id).await;

    // Prime the pool.
    let response = fixture
        .app
        .clone()
        .oneshot(post_json(
            "/network/scan",
            serde_json::json!({ "sessionId": session_id, "routerId": "aabbccddeeff" }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["success"], true);
    assert_eq!(fixture.connects.load(Ordering::SeqCst), 1);

    // End the session: the pooled shell must be closed.
    let response = fixture
        .app
        .clone()
        .oneshot(post_json(
            "/session/end",
            serde_json::json!({ "sessionId": session_id }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["success"], true);
    assert!(fixture.last_closed.load(Ordering::SeqCst));

    // Subsequent commands under the dead session fail with UnknownSession.
    let response = fixture
        .app
        .oneshot(post_json(
            "/network/scan",
            serde_json::json!({ "sessionId": session_id, "routerId": "aabbccddeeff" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UnknownSession");
}

#[tokio::test]
async fn refresh_of_unknown_session_fails_in_envelope() {
    let fixture = build_fixture();
    let response = fixture
        .app
        .oneshot(post_json(
            "/session/refresh",
            serde_json::json!({ "sessionId": SessionId::new() }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UnknownSession");
}

#[tokio::test]
async fn whitelist_round_trip_over_http() {
    let fixture = build_fixture();
    let session_id = SessionId::new();
    start_session(&fixture.app, session_id).await;

    let response = fixture
        .app
        .clone()
        .oneshot(post_json(
            "/whitelist/add",
            serde_json::json!({
                "sessionId": session_id,
                "routerId": "aabbccddeeff",
                "ip": "192.168.1.10"
            }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["added"], "192.168.1.10");

    let response = fixture
        .app
        .oneshot(post_json(
            "/whitelist/limit-rate",
            serde_json::json!({
                "sessionId": session_id,
                "routerId": "aabbccddeeff",
                "rate": 100
            }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["rate"], 100);
}
