use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
// tokio's Instant respects the paused test clock, unlike std's.
use tokio::time::Instant;
use tracing::{debug, info};

use netpilot_core::{RouterId, SessionId};

use crate::error::CommandsError;
use crate::ssh::RouterShell;

/// Pooled connection state for one `(session, router)` pair.
///
/// The mutex is the per-router serialisation point: whoever holds it owns
/// the SSH channel until the command completes.
pub struct RouterConnection {
    pub slot: Mutex<ConnectionSlot>,
}

/// Contents of the per-router slot, only reachable through the mutex.
pub struct ConnectionSlot {
    pub shell: Option<Arc<dyn RouterShell>>,
    pub consecutive_failures: u32,
}

impl RouterConnection {
    fn new() -> Self {
        Self {
            slot: Mutex::new(ConnectionSlot {
                shell: None,
                consecutive_failures: 0,
            }),
        }
    }
}

/// State held for one mirrored session.
pub struct SessionContext {
    pub session_id: SessionId,
    last_activity: Mutex<Instant>,
    routers: DashMap<RouterId, Arc<RouterConnection>>,
}

impl SessionContext {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            last_activity: Mutex::new(Instant::now()),
            routers: DashMap::new(),
        }
    }

    /// The connection slot for a router, created lazily on first use.
    pub fn router_conn(&self, router_id: &RouterId) -> Arc<RouterConnection> {
        self.routers
            .entry(router_id.clone())
            .or_insert_with(|| Arc::new(RouterConnection::new()))
            .clone()
    }

    /// Record activity, resetting the idle clock.
    pub async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    async fn idle_for(&self) -> Duration {
        self.last_activity.lock().await.elapsed()
    }

    /// Close every pooled shell. Called on session end and idle expiry.
    pub async fn close_all(&self) {
        for entry in &self.routers {
            let mut slot = entry.value().slot.lock().await;
            if let Some(shell) = slot.shell.take() {
                shell.close().await;
            }
            slot.consecutive_failures = 0;
        }
        self.routers.clear();
    }
}

/// The global session table.
///
/// Sessions are announced by the Auth/DB server; this registry holds no
/// authoritative data and may be discarded wholesale without loss.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionContext>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Idempotent; with `restart`, existing state under
    /// the same id is torn down first. Returns `true` when a new context
    /// was created.
    pub async fn start(&self, session_id: SessionId, restart: bool) -> bool {
        if restart {
            self.end(session_id).await;
        }
        let mut created = false;
        self.sessions.entry(session_id).or_insert_with(|| {
            created = true;
            Arc::new(SessionContext::new(session_id))
        });
        if created {
            info!(%session_id, restart, "session started");
        } else {
            debug!(%session_id, "session already registered");
        }
        created
    }

    /// Tear down a session, closing any pooled SSH connections. Idempotent.
    pub async fn end(&self, session_id: SessionId) -> bool {
        let Some((_, ctx)) = self.sessions.remove(&session_id) else {
            return false;
        };
        ctx.close_all().await;
        info!(%session_id, "session ended");
        true
    }

    /// Reset a session's idle TTL.
    ///
    /// # Errors
    ///
    /// `UnknownSession` when the session was never announced (or already
    /// reaped).
    pub async fn refresh(&self, session_id: SessionId) -> Result<(), CommandsError> {
        let ctx = self.get(session_id)?;
        ctx.touch().await;
        Ok(())
    }

    /// Fetch a session context.
    ///
    /// # Errors
    ///
    /// `UnknownSession` when absent.
    pub fn get(&self, session_id: SessionId) -> Result<Arc<SessionContext>, CommandsError> {
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(CommandsError::UnknownSession(session_id))
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle longer than `ttl`, closing their connections.
    /// Returns the ids reaped.
    pub async fn reap_idle(&self, ttl: Duration) -> Vec<SessionId> {
        let mut stale = Vec::new();
        for entry in &self.sessions {
            if entry.value().idle_for().await > ttl {
                stale.push(*entry.key());
            }
        }
        let mut reaped = Vec::new();
        for session_id in stale {
            if self.end(session_id).await {
                info!(%session_id, "session reaped after idle ttl");
                reaped.push(session_id);
            }
        }
        reaped
    }
}

/// Spawn the background reaper loop for idle sessions.
pub fn spawn_idle_reaper(
    registry: Arc<SessionRegistry>,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    // Check at a fraction of the TTL so expiry lag stays bounded.
    let interval = (ttl / 4).max(Duration::from_secs(5));
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await;
        loop {
            timer.tick().await;
            registry.reap_idle(ttl).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::ssh::ShellOutput;

    use super::*;

    struct FlagShell {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RouterShell for FlagShell {
        async fn exec(&self, _command: &str) -> Result<ShellOutput, CommandsError> {
            Ok(ShellOutput {
                exit_status: 0,
                stdout: String::new(),
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

    fn rid(s: &str) -> RouterId {
        RouterId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        assert!(registry.start(id, false).await);
        assert!(!registry.start(id, false).await);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn restart_tears_down_existing_state() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.start(id, false).await;

        let closed = Arc::new(AtomicBool::new(false));
        let ctx = registry.get(id).unwrap();
        {
            let conn = ctx.router_conn(&rid("aabbccddeeff"));
            conn.slot.lock().await.shell = Some(Arc::new(FlagShell {
                closed: Arc::clone(&closed),
            }));
        }

        assert!(registry.start(id, true).await);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn end_closes_pooled_shells_and_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.start(id, false).await;

        let closed = Arc::new(AtomicBool::new(false));
        {
            let ctx = registry.get(id).unwrap();
            let conn = ctx.router_conn(&rid("aabbccddeeff"));
            conn.slot.lock().await.shell = Some(Arc::new(FlagShell {
                closed: Arc::clone(&closed),
            }));
        }

        assert!(registry.end(id).await);
        assert!(closed.load(Ordering::SeqCst));
        assert!(!registry.end(id).await);
        assert!(registry.get(id).is_err());
    }

    #[tokio::test]
    async fn refresh_unknown_session_fails() {
        let registry = SessionRegistry::new();
        let err = registry.refresh(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, CommandsError::UnknownSession(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_reaped() {
        let registry = SessionRegistry::new();
        let idle = SessionId::new();
        let busy = SessionId::new();
        registry.start(idle, false).await;
        registry.start(busy, false).await;

        tokio::time::advance(Duration::from_secs(120)).await;
        registry.refresh(busy).await.unwrap();

        let reaped = registry.reap_idle(Duration::from_secs(60)).await;
        assert_eq!(reaped, vec![idle]);
        assert!(registry.get(busy).is_ok());
    }

    #[tokio::test]
    async fn router_conn_is_shared_per_router() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.start(id, false).await;
        let ctx = registry.get(id).unwrap();
        let a = ctx.router_conn(&rid("aabbccddeeff"));
        let b = ctx.router_conn(&rid("aabbccddeeff"));
        assert!(Arc::ptr_eq(&a, &b));
        let c = ctx.router_conn(&rid("ffeeddccbbaa"));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
