use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, warn};

use netpilot_client::PortManagerClient;
use netpilot_core::{CommandResponse, ResponseMetadata, RouterId, SessionId};

use crate::error::CommandsError;
use crate::ops::{self, RouterOp};
use crate::session::SessionRegistry;
use crate::ssh::ShellConnector;

/// Consecutive command failures after which the pooled connection is
/// discarded and re-dialed on next use.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// How long a Port Manager lookup stays cached.
const PORT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Resolves a router id to its tunnel port.
///
/// Production resolves through the Port Manager's read-only lookup; tests
/// substitute a fixed map.
#[async_trait]
pub trait PortResolver: Send + Sync {
    async fn resolve(&self, router_id: &RouterId) -> Result<Option<u16>, CommandsError>;
}

/// [`PortResolver`] backed by the Port Manager HTTP API.
pub struct LeaseLookup {
    client: PortManagerClient,
}

impl LeaseLookup {
    #[must_use]
    pub fn new(client: PortManagerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PortResolver for LeaseLookup {
    async fn resolve(&self, router_id: &RouterId) -> Result<Option<u16>, CommandsError> {
        self.client
            .lookup_router(router_id)
            .await
            .map_err(|e| CommandsError::PortManager(e.to_string()))
    }
}

/// Per-operation deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub command: Duration,
    pub scan: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(30),
            scan: Duration::from_secs(60),
        }
    }
}

impl Deadlines {
    fn for_op(&self, op: &RouterOp) -> Duration {
        match op {
            RouterOp::Scan => self.scan,
            _ => self.command,
        }
    }
}

/// Executes router operations over pooled SSH connections.
///
/// One command at a time per `(session, router)` — enforced by the
/// connection slot mutex — while distinct routers under the same session
/// proceed in parallel.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn PortResolver>,
    connector: Arc<dyn ShellConnector>,
    port_cache: Cache<RouterId, u16>,
    deadlines: Deadlines,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<dyn PortResolver>,
        connector: Arc<dyn ShellConnector>,
        deadlines: Deadlines,
    ) -> Self {
        Self {
            registry,
            resolver,
            connector,
            port_cache: Cache::builder()
                .time_to_live(PORT_CACHE_TTL)
                .max_capacity(1024)
                .build(),
            deadlines,
        }
    }

    /// Run one operation and fold the outcome into the uniform envelope.
    pub async fn dispatch(
        &self,
        session_id: SessionId,
        router_id: RouterId,
        op: RouterOp,
    ) -> CommandResponse {
        let started = Instant::now();
        let result = self.run(session_id, &router_id, &op).await;
        let metadata = ResponseMetadata {
            router_id: Some(router_id.clone()),
            session_id: Some(session_id),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        match result {
            Ok(data) => {
                debug!(%session_id, %router_id, op = op.name(), duration_ms = metadata.duration_ms, "command succeeded");
                CommandResponse::ok(data, metadata)
            }
            Err(err) => {
                warn!(%session_id, %router_id, op = op.name(), code = %err.code(), error = %err, "command failed");
                CommandResponse::fail(err.to_command_error(), metadata)
            }
        }
    }

    async fn run(
        &self,
        session_id: SessionId,
        router_id: &RouterId,
        op: &RouterOp,
    ) -> Result<serde_json::Value, CommandsError> {
        let ctx = self.registry.get(session_id)?;
        ctx.touch().await;

        let port = self.resolve_port(router_id).await?;
        let conn = ctx.router_conn(router_id);

        // Per-router serialisation: the slot lock is held across the whole
        // command, including the SSH round-trip.
        let mut slot = conn.slot.lock().await;

        if let Some(shell) = &slot.shell
            && !shell.is_alive().await
        {
            slot.shell = None;
        }
        if slot.shell.is_none() {
            slot.shell = Some(self.connector.connect(port).await?);
            slot.consecutive_failures = 0;
        }
        let shell = Arc::clone(slot.shell.as_ref().ok_or_else(|| {
            CommandsError::Internal("connection slot empty after connect".to_owned())
        })?);

        let deadline = self.deadlines.for_op(op);
        match tokio::time::timeout(deadline, ops::execute(shell.as_ref(), op)).await {
            Ok(Ok(data)) => {
                slot.consecutive_failures = 0;
                Ok(data)
            }
            Ok(Err(err)) => {
                slot.consecutive_failures += 1;
                let drop_conn = slot.consecutive_failures >= MAX_CONSECUTIVE_FAILURES
                    || matches!(err, CommandsError::TunnelDown { .. });
                if drop_conn {
                    if let Some(shell) = slot.shell.take() {
                        shell.close().await;
                    }
                    slot.consecutive_failures = 0;
                }
                Err(err)
            }
            Err(_elapsed) => {
                // The in-flight SSH operation is abandoned with the
                // connection; a fresh one is dialed on next use.
                if let Some(shell) = slot.shell.take() {
                    shell.close().await;
                }
                slot.consecutive_failures = 0;
                Err(CommandsError::Timeout {
                    elapsed_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    mutating: op.is_mutating(),
                })
            }
        }
    }

    async fn resolve_port(&self, router_id: &RouterId) -> Result<u16, CommandsError> {
        if let Some(port) = self.port_cache.get(router_id).await {
            return Ok(port);
        }
        let port = self
            .resolver
            .resolve(router_id)
            .await?
            .ok_or_else(|| CommandsError::UnknownRouter(router_id.clone()))?;
        self.port_cache.insert(router_id.clone(), port).await;
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use netpilot_core::ErrorCode;

    use crate::ssh::{RouterShell, ShellOutput};

    use super::*;

    struct FixedResolver {
        ports: HashMap<RouterId, u16>,
    }

    #[async_trait]
    impl PortResolver for FixedResolver {
        async fn resolve(&self, router_id: &RouterId) -> Result<Option<u16>, CommandsError> {
            Ok(self.ports.get(router_id).copied())
        }
    }

    /// Scripted shell: answers every exec with a canned output after an
    /// optional delay, counting concurrent entries to prove serialisation.
    struct ScriptedShell {
        output: ShellOutput,
        delay: Duration,
        in_flight: Arc<AtomicU32>,
        max_in_flight: Arc<AtomicU32>,
    }

    #[async_trait]
    impl RouterShell for ScriptedShell {
        async fn exec(&self, _command: &str) -> Result<ShellOutput, CommandsError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }

        async fn is_alive(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    struct ScriptedConnector {
        delay: Duration,
        exit_status: u32,
        connects: Arc<AtomicU32>,
        in_flight: Arc<AtomicU32>,
        max_in_flight: Arc<AtomicU32>,
    }

    impl ScriptedConnector {
        fn ok() -> Self {
            Self {
                delay: Duration::ZERO,
                exit_status: 0,
                connects: Arc::new(AtomicU32::new(0)),
                in_flight: Arc::new(AtomicU32::new(0)),
                max_in_flight: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl ShellConnector for ScriptedConnector {
        async fn connect(&self, _port: u16) -> Result<Arc<dyn RouterShell>, CommandsError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedShell {
                output: ShellOutput {
                    exit_status: self.exit_status,
                    stdout: String::new(),
                    stderr: "scripted failure".to_owned(),
                },
                delay: self.delay,
                in_flight: Arc::clone(&self.in_flight),
                max_in_flight: Arc::clone(&self.max_in_flight),
            }))
        }
    }

    struct DownConnector;

    #[async_trait]
    impl ShellConnector for DownConnector {
        async fn connect(&self, port: u16) -> Result<Arc<dyn RouterShell>, CommandsError> {
            Err(CommandsError::TunnelDown {
                port,
                detail: "connection refused".to_owned(),
            })
        }
    }

    fn rid(s: &str) -> RouterId {
        RouterId::parse(s).unwrap()
    }

    fn fixture(
        connector: Arc<dyn ShellConnector>,
        deadlines: Deadlines,
    ) -> (Arc<SessionRegistry>, Dispatcher) {
        let registry = Arc::new(SessionRegistry::new());
        let mut ports = HashMap::new();
        ports.insert(rid("aabbccddeeff"), 2201);
        ports.insert(rid("ffeeddccbbaa"), 2202);
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(FixedResolver { ports }),
            connector,
            deadlines,
        );
        (registry, dispatcher)
    }

    #[tokio::test]
    async fn unknown_session_is_rejected_without_dialing() {
        let (_registry, dispatcher) =
            fixture(Arc::new(ScriptedConnector::ok()), Deadlines::default());
        let response = dispatcher
            .dispatch(
                SessionId::new(),
                rid("aabbccddeeff"),
                RouterOp::Block {
                    ip: "192.168.1.10".into(),
                },
            )
            .await;
        assert!(!response.success);
        assert_eq!(response.error_code(), Some(ErrorCode::UnknownSession));
    }

    #[tokio::test]
    async fn unleased_router_is_unknown_router() {
        let (registry, dispatcher) =
            fixture(Arc::new(ScriptedConnector::ok()), Deadlines::default());
        let session = SessionId::new();
        registry.start(session, false).await;
        let response = dispatcher
            .dispatch(session, rid("aabbccddee99"), RouterOp::Scan)
            .await;
        assert_eq!(response.error_code(), Some(ErrorCode::UnknownRouter));
    }

    #[tokio::test]
    async fn connection_is_pooled_across_commands() {
        let connector = Arc::new(ScriptedConnector::ok());
        let connects = Arc::clone(&connector.connects);
        let (registry, dispatcher) = fixture(connector, Deadlines::default());
        let session = SessionId::new();
        registry.start(session, false).await;

        for _ in 0..3 {
            let response = dispatcher
                .dispatch(
                    session,
                    rid("aabbccddeeff"),
                    RouterOp::Unblock {
                        ip: "192.168.1.10".into(),
                    },
                )
                .await;
            assert!(response.success, "unexpected failure: {response:?}");
        }
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_router_commands_never_interleave() {
        let connector = Arc::new(ScriptedConnector {
            delay: Duration::from_millis(25),
            ..ScriptedConnector::ok()
        });
        let max_in_flight = Arc::clone(&connector.max_in_flight);
        let (registry, dispatcher) = fixture(connector, Deadlines::default());
        let session = SessionId::new();
        registry.start(session, false).await;

        let dispatcher = Arc::new(dispatcher);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let d = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                d.dispatch(
                    session,
                    rid("aabbccddeeff"),
                    RouterOp::Unblock {
                        ip: "192.168.1.10".into(),
                    },
                )
                .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().success);
        }
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_routers_run_in_parallel() {
        let connector = Arc::new(ScriptedConnector {
            delay: Duration::from_millis(50),
            ..ScriptedConnector::ok()
        });
        let max_in_flight = Arc::clone(&connector.max_in_flight);
        let (registry, dispatcher) = fixture(connector, Deadlines::default());
        let session = SessionId::new();
        registry.start(session, false).await;

        let dispatcher = Arc::new(dispatcher);
        let a = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                d.dispatch(session, rid("aabbccddeeff"), RouterOp::Scan).await
            })
        };
        let b = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                d.dispatch(session, rid("ffeeddccbbaa"), RouterOp::Scan).await
            })
        };
        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_reports_code_and_drops_connection() {
        let connector = Arc::new(ScriptedConnector {
            delay: Duration::from_millis(200),
            ..ScriptedConnector::ok()
        });
        let connects = Arc::clone(&connector.connects);
        let deadlines = Deadlines {
            command: Duration::from_millis(20),
            scan: Duration::from_millis(20),
        };
        let (registry, dispatcher) = fixture(connector, deadlines);
        let session = SessionId::new();
        registry.start(session, false).await;

        let response = dispatcher
            .dispatch(
                session,
                rid("aabbccddeeff"),
                RouterOp::Block {
                    ip: "192.168.1.10".into(),
                },
            )
            .await;
        assert_eq!(response.error_code(), Some(ErrorCode::Timeout));
        assert!(!response.error.as_ref().unwrap().retryable);

        // Next command dials a fresh connection.
        let _ = dispatcher
            .dispatch(session, rid("aabbccddeeff"), RouterOp::Scan)
            .await;
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tunnel_down_surfaces_as_retryable() {
        let (registry, dispatcher) = fixture(Arc::new(DownConnector), Deadlines::default());
        let session = SessionId::new();
        registry.start(session, false).await;

        let response = dispatcher
            .dispatch(session, rid("aabbccddeeff"), RouterOp::Scan)
            .await;
        assert_eq!(response.error_code(), Some(ErrorCode::TunnelDown));
        assert!(response.error.as_ref().unwrap().retryable);
    }

    #[tokio::test]
    async fn repeated_failures_recycle_the_connection() {
        let connector = Arc::new(ScriptedConnector {
            exit_status: 1,
            ..ScriptedConnector::ok()
        });
        let connects = Arc::clone(&connector.connects);
        let (registry, dispatcher) = fixture(connector, Deadlines::default());
        let session = SessionId::new();
        registry.start(session, false).await;

        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            let response = dispatcher
                .dispatch(
                    session,
                    rid("aabbccddeeff"),
                    RouterOp::Block {
                        ip: "192.168.1.10".into(),
                    },
                )
                .await;
            assert_eq!(response.error_code(), Some(ErrorCode::CommandFailed));
        }
        // Third failure dropped the shell; this dials again.
        let _ = dispatcher
            .dispatch(
                session,
                rid("aabbccddeeff"),
                RouterOp::Block {
                    ip: "192.168.1.10".into(),
                },
            )
            .await;
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn envelope_carries_metadata() {
        let (registry, dispatcher) =
            fixture(Arc::new(ScriptedConnector::ok()), Deadlines::default());
        let session = SessionId::new();
        registry.start(session, false).await;

        let response = dispatcher
            .dispatch(
                session,
                rid("aabbccddeeff"),
                RouterOp::Unblock {
                    ip: "192.168.1.10".into(),
                },
            )
            .await;
        assert_eq!(response.metadata.session_id, Some(session));
        assert_eq!(
            response.metadata.router_id.as_ref().map(ToString::to_string),
            Some("aabbccddeeff".to_owned())
        );
    }
}
