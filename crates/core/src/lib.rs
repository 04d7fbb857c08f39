//! Core types and shared abstractions for the NetPilot control plane.
//!
//! Everything that crosses a process boundary lives here: router and session
//! identifiers, the uniform `{success, data?, error?, metadata}` envelope,
//! the stable error-code taxonomy, port-lease wire shapes, and the single
//! retry helper used by every component.

pub mod command;
pub mod device;
pub mod envelope;
pub mod error;
pub mod lease;
pub mod retry;
pub mod router;

pub use command::{
    BandwidthUsage, DeviceCommandRequest, DeviceMonitorRequest, ListKind, ModeCommandRequest,
    MonitorPeriod, RateCommandRequest, RouterRequest, SessionRequest,
};
pub use device::{Device, normalize_mac, validate_ip, validate_rate};
pub use envelope::{CommandError, CommandResponse, ErrorCode, ResponseMetadata};
pub use error::CoreError;
pub use lease::{
    AllocateRequest, PortLease, PortResponse, ReleaseRequest, ReleaseResponse, RouterResponse,
};
pub use retry::{RetryPolicy, retry};
pub use router::{RouterId, SessionId};
