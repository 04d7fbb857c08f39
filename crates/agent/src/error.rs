use thiserror::Error;

/// Errors surfaced by the Agent to its UI.
///
/// Tunnel-layer failures are reported, never acted on implicitly: a
/// transient error must not mutate the Port Manager lease or the persisted
/// tunnel state.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The router did not answer on its LAN address.
    #[error("router unreachable: {0}")]
    RouterUnreachable(String),

    /// The configured router credential was rejected.
    #[error("router authentication failed: {0}")]
    RouterAuth(String),

    /// The router's LAN MAC could not be read.
    #[error("identity discovery failed: {0}")]
    Identity(String),

    /// The Port Manager could not be reached or refused the request.
    #[error("port manager error: {0}")]
    PortManager(String),

    /// Reading or writing the persisted tunnel state failed.
    #[error("tunnel state error: {0}")]
    State(String),

    /// Installing or controlling the on-router supervisor failed.
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// A required configuration value is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested action does not apply in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}
