use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use netpilot_core::RouterId;

use crate::error::AgentError;
use crate::identity::discover_router_id;
use crate::leases::LeaseApi;
use crate::provision::{self, TunnelParams};
use crate::shell::RouterDialer;
use crate::state::{TunnelPhase, TunnelState, TunnelStateFile};

/// Observable tunnel state, as reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Uninitialized,
    Configured,
    Connected,
    /// The supervisor should be up but cannot currently be confirmed
    /// (router unreachable or keepalive restarting).
    Degraded,
    Disconnected,
}

/// Snapshot returned by every [`AgentService`] operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub state: AgentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_id: Option<RouterId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_host: Option<String>,
}

impl AgentStatus {
    fn uninitialized() -> Self {
        Self {
            state: AgentState::Uninitialized,
            router_id: None,
            port: None,
            vm_host: None,
        }
    }

    fn from_state(state: &TunnelState, agent_state: AgentState) -> Self {
        Self {
            state: agent_state,
            router_id: Some(state.router_id.clone()),
            port: Some(state.port),
            vm_host: Some(state.vm_host.clone()),
        }
    }
}

/// The typed RPC surface the Agent UI talks to.
///
/// A finite operation set instead of ad-hoc message handlers: the UI binds
/// to this trait, the supervisor implements it.
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Establish (or re-establish) the tunnel.
    async fn connect(&self) -> Result<AgentStatus, AgentError>;
    /// Stop the tunnel, keeping the port lease for the next connect.
    async fn disconnect(&self) -> Result<AgentStatus, AgentError>;
    /// Remove everything from the router, release the port, clear state.
    async fn reset(&self) -> Result<AgentStatus, AgentError>;
    /// Report the current observable state without mutating anything.
    async fn status(&self) -> Result<AgentStatus, AgentError>;
}

/// Drives the tunnel lifecycle: identity discovery, port acquisition,
/// on-router provisioning, and persisted state.
pub struct TunnelSupervisor {
    dialer: Arc<dyn RouterDialer>,
    leases: Arc<dyn LeaseApi>,
    state_file: TunnelStateFile,
    vm_host: String,
    vm_user: String,
    vm_password: String,
}

impl TunnelSupervisor {
    #[must_use]
    pub fn new(
        dialer: Arc<dyn RouterDialer>,
        leases: Arc<dyn LeaseApi>,
        state_file: TunnelStateFile,
        vm_host: impl Into<String>,
        vm_user: impl Into<String>,
        vm_password: impl Into<String>,
    ) -> Self {
        Self {
            dialer,
            leases,
            state_file,
            vm_host: vm_host.into(),
            vm_user: vm_user.into(),
            vm_password: vm_password.into(),
        }
    }

    /// The acquire-port protocol: reuse the persisted port when the Port
    /// Manager still agrees, allocate otherwise.
    async fn acquire_port(
        &self,
        router_id: &RouterId,
        persisted: Option<&TunnelState>,
    ) -> Result<u16, AgentError> {
        if let Some(state) = persisted
            && state.router_id == *router_id
        {
            match self.leases.lookup(router_id).await? {
                Some(port) if port == state.port => {
                    info!(%router_id, port, "reusing persisted tunnel port");
                    return Ok(port);
                }
                Some(port) => {
                    warn!(%router_id, persisted = state.port, current = port, "persisted port superseded by port manager");
                }
                None => {
                    warn!(%router_id, persisted = state.port, "persisted lease no longer exists");
                }
            }
        }
        let port = self.leases.allocate(router_id).await?;
        info!(%router_id, port, "tunnel port allocated");
        Ok(port)
    }
}

#[async_trait]
impl AgentService for TunnelSupervisor {
    async fn connect(&self) -> Result<AgentStatus, AgentError> {
        // Reach the router before touching any state: an unreachable router
        // or bad credential must leave everything as it was.
        let shell = self.dialer.dial().await?;
        let router_id = discover_router_id(shell.as_ref()).await?;

        let persisted = self.state_file.load().await?;
        let port = self.acquire_port(&router_id, persisted.as_ref()).await?;

        // Persist before provisioning: a crash between here and the service
        // start leaves a Configured state the next connect resumes from.
        let mut state = TunnelState {
            router_id: router_id.clone(),
            port,
            vm_host: self.vm_host.clone(),
            vm_user: self.vm_user.clone(),
            phase: TunnelPhase::Configured,
        };
        self.state_file.save(&state).await?;

        let params = TunnelParams {
            vm_host: self.vm_host.clone(),
            vm_user: self.vm_user.clone(),
            vm_password: self.vm_password.clone(),
            port,
        };
        provision::install(shell.as_ref(), &params).await?;
        provision::start(shell.as_ref()).await?;
        shell.close().await;

        state.phase = TunnelPhase::Connected;
        self.state_file.save(&state).await?;
        info!(%router_id, port, "tunnel established");

        Ok(AgentStatus::from_state(&state, AgentState::Connected))
    }

    async fn disconnect(&self) -> Result<AgentStatus, AgentError> {
        let Some(mut state) = self.state_file.load().await? else {
            return Err(AgentError::InvalidState(
                "no tunnel is configured".to_owned(),
            ));
        };

        let shell = self.dialer.dial().await?;
        provision::stop(shell.as_ref()).await?;
        shell.close().await;

        // The lease and port survive a disconnect by design of the
        // teardown contract; only reset releases them.
        state.phase = TunnelPhase::Disconnected;
        self.state_file.save(&state).await?;
        info!(router_id = %state.router_id, "tunnel disconnected, lease kept");

        Ok(AgentStatus::from_state(&state, AgentState::Disconnected))
    }

    async fn reset(&self) -> Result<AgentStatus, AgentError> {
        let persisted = self.state_file.load().await?;

        let shell = self.dialer.dial().await?;
        provision::remove(shell.as_ref()).await?;
        shell.close().await;

        if let Some(state) = persisted {
            self.leases.release(&state.router_id).await?;
            info!(router_id = %state.router_id, port = state.port, "lease released");
        }
        self.state_file.clear().await?;

        Ok(AgentStatus::uninitialized())
    }

    async fn status(&self) -> Result<AgentStatus, AgentError> {
        let Some(state) = self.state_file.load().await? else {
            return Ok(AgentStatus::uninitialized());
        };

        let agent_state = match state.phase {
            TunnelPhase::Configured => AgentState::Configured,
            TunnelPhase::Disconnected => AgentState::Disconnected,
            TunnelPhase::Connected => match self.dialer.dial().await {
                Ok(shell) => {
                    let running = provision::is_running(shell.as_ref()).await;
                    shell.close().await;
                    match running {
                        Ok(true) => AgentState::Connected,
                        _ => AgentState::Degraded,
                    }
                }
                Err(_) => AgentState::Degraded,
            },
        };

        Ok(AgentStatus::from_state(&state, agent_state))
    }
}
