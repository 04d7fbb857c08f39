//! NetPilot Commands-Server.
//!
//! Stateless with respect to users and authorisation; stateful with respect
//! to sessions and open SSH connections. The Auth/DB server is the only
//! upstream client and is trusted implicitly; this process performs zero
//! authorisation of its own.
//!
//! For each `(sessionId, routerId)` at most one SSH connection is held open
//! through the router's reverse tunnel (`127.0.0.1:<tunnelPort>`), and at
//! most one command runs on it at a time. Distinct routers under the same
//! session execute in parallel.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ops;
pub mod session;
pub mod ssh;

pub use api::{AppState, router};
pub use config::CommandsConfig;
pub use dispatcher::{Deadlines, Dispatcher, LeaseLookup, PortResolver};
pub use error::CommandsError;
pub use ops::RouterOp;
pub use session::{SessionContext, SessionRegistry, spawn_idle_reaper};
pub use ssh::{RouterShell, RusshConnector, ShellConnector, ShellOutput};
