use std::time::Duration;

/// Commands-Server runtime configuration, resolved from the environment.
#[derive(Debug, Clone)]
pub struct CommandsConfig {
    /// Base URL of the Port Manager (`PORT_MANAGER_URL`).
    pub port_manager_url: String,
    /// Shared bearer token for the Port Manager (`PORT_MANAGER_TOKEN`).
    pub port_manager_token: String,
    /// SSH user for the tunnel hop (`CLOUD_USER`).
    pub ssh_user: String,
    /// SSH password for the tunnel hop (`CLOUD_PASSWORD`).
    pub ssh_password: String,
    /// Idle TTL after which a session is reaped (`SESSION_IDLE_TTL`, seconds).
    pub session_idle_ttl: Duration,
    /// Default per-command deadline (`COMMAND_TIMEOUT_MS`).
    pub command_timeout: Duration,
    /// Scan deadline (`SCAN_TIMEOUT_MS`).
    pub scan_timeout: Duration,
}

impl CommandsConfig {
    /// Resolve configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when a required variable is missing or a numeric one is
    /// unparseable. The SSH credential and Port Manager coordinates are
    /// startup invariants.
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port_manager_url: required("PORT_MANAGER_URL")?,
            port_manager_token: required("PORT_MANAGER_TOKEN")?,
            ssh_user: std::env::var("CLOUD_USER").unwrap_or_else(|_| "netpilot".to_owned()),
            ssh_password: required("CLOUD_PASSWORD")?,
            session_idle_ttl: Duration::from_secs(parse_or("SESSION_IDLE_TTL", 1800)?),
            command_timeout: Duration::from_millis(parse_or("COMMAND_TIMEOUT_MS", 30_000)?),
            scan_timeout: Duration::from_millis(parse_or("SCAN_TIMEOUT_MS", 60_000)?),
        })
    }
}

fn required(name: &str) -> Result<String, String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("{name} environment variable is required"))
}

fn parse_or(name: &str, default: u64) -> Result<u64, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid {name}: {e}")),
        Err(_) => Ok(default),
    }
}
