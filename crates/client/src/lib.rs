//! NetPilot HTTP clients.
//!
//! Two typed wrappers over the control-plane wire protocols:
//!
//! - [`PortManagerClient`] — the Port Manager lease API, used by the Agent
//!   (allocate/release) and the Commands-Server (read-only lookups).
//! - [`CommandsClient`] — the Commands-Server command API, used exclusively
//!   by the Auth/DB orchestrator. The [`CommandsApi`] trait is the seam the
//!   orchestrator holds, so tests can substitute a scripted implementation.
//!
//! # Quick start
//!
//! ```no_run
//! use netpilot_client::{CommandsApi, CommandsClient};
//! use netpilot_core::{RouterId, SessionId};
//!
//! # async fn example() -> Result<(), netpilot_client::ClientError> {
//! let client = CommandsClient::new("http://localhost:9090")?;
//! let session = SessionId::new();
//! client.start_session(session, false).await?;
//!
//! let router = RouterId::parse("aabbccddeeff").expect("valid id");
//! let response = client.scan(session, &router).await?;
//! println!("scan: {response:?}");
//! # Ok(())
//! # }
//! ```

mod commands;
mod error;
mod ports;

pub use commands::{CommandsApi, CommandsClient, CommandsClientBuilder};
pub use error::ClientError;
pub use ports::{PortManagerClient, PortManagerClientBuilder};
