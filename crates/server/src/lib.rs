//! NetPilot Auth/DB orchestrator.
//!
//! The cloud-facing API and the only client of the Commands-Server. Owns
//! all persistent user truth: accounts, sessions, router ownership,
//! device inventory, list memberships, mode state, and 2FA material.
//!
//! Every router action follows the same dispatch pattern: validate
//! locally, make sure the session is mirrored, call the Commands-Server
//! with a bounded timeout, and persist the consequent change in a single
//! transaction only after `success = true`.

pub mod api;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod store;
pub mod twofactor;

pub use api::{AppState, router};
pub use config::ServerConfig;
pub use error::ApiError;
