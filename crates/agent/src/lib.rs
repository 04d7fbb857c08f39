//! NetPilot Agent core.
//!
//! Runs on the administrator's LAN host. Discovers the router's stable
//! identity, leases a tunnel port from the Port Manager, provisions a
//! procd-managed keepalive on the router that holds a reverse SSH tunnel
//! open to the cloud VM, and persists just enough state to restart
//! idempotently. The tunnel itself lives on the router; this process only
//! provisions and observes it.

pub mod config;
pub mod error;
pub mod identity;
pub mod leases;
pub mod provision;
pub mod shell;
pub mod state;
pub mod supervisor;

pub use config::AgentConfig;
pub use error::AgentError;
pub use leases::{LeaseApi, PortManagerLeases};
pub use shell::{ExecOutput, RemoteShell, RouterDialer, RusshDialer};
pub use state::{TunnelPhase, TunnelState, TunnelStateFile};
pub use supervisor::{AgentService, AgentState, AgentStatus, TunnelSupervisor};
