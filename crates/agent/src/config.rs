use crate::error::AgentError;

/// Agent runtime configuration, resolved from the environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Public address of the cloud VM (`CLOUD_VM_IP`).
    pub vm_host: String,
    /// SSH user on the VM the tunnel binds under (`CLOUD_USER`).
    pub vm_user: String,
    /// That user's password (`CLOUD_PASSWORD`).
    pub vm_password: String,
    /// Base URL of the Port Manager (`PORT_MANAGER_URL`).
    pub port_manager_url: String,
    /// Shared bearer token for the Port Manager (`PORT_MANAGER_TOKEN`).
    pub port_manager_token: String,
    /// LAN address of the router (`ROUTER_HOST`).
    pub router_host: String,
    /// Router SSH user (`ROUTER_USER`).
    pub router_user: String,
    /// Router SSH password (`ROUTER_PASSWORD`).
    pub router_password: String,
    /// Path of the persisted tunnel state (`NETPILOT_STATE_FILE`).
    pub state_file: String,
}

impl AgentConfig {
    /// Resolve configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when a required credential or address is missing.
    pub fn from_env() -> Result<Self, AgentError> {
        Ok(Self {
            vm_host: required("CLOUD_VM_IP")?,
            vm_user: std::env::var("CLOUD_USER").unwrap_or_else(|_| "netpilot".to_owned()),
            vm_password: required("CLOUD_PASSWORD")?,
            port_manager_url: required("PORT_MANAGER_URL")?,
            port_manager_token: required("PORT_MANAGER_TOKEN")?,
            router_host: std::env::var("ROUTER_HOST").unwrap_or_else(|_| "192.168.1.1".to_owned()),
            router_user: std::env::var("ROUTER_USER").unwrap_or_else(|_| "root".to_owned()),
            router_password: required("ROUTER_PASSWORD")?,
            state_file: std::env::var("NETPILOT_STATE_FILE")
                .unwrap_or_else(|_| "tunnel-state.json".to_owned()),
        })
    }
}

fn required(name: &str) -> Result<String, AgentError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AgentError::Config(format!("{name} environment variable is required")))
}
