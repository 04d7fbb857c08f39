//! NetPilot Port Manager.
//!
//! The single authority mapping a `routerId` to a TCP port on the VM inside
//! a configured range. Allocation is idempotent per router, serialised by
//! one mutex, and written through to a durable store before it becomes
//! visible, so a crash never leaks a half-allocated port.

pub mod allocator;
pub mod api;
pub mod config;
pub mod error;
pub mod store;

pub use allocator::PortAllocator;
pub use api::{AppState, router};
pub use config::PortManagerConfig;
pub use error::PortError;
pub use store::{FileLeaseStore, LeaseStore, MemoryLeaseStore};
