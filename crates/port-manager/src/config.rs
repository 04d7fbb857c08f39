use crate::error::PortError;

/// Default tunnel port range, matching the fleet provisioning scripts.
const DEFAULT_RANGE_MIN: u16 = 2200;
const DEFAULT_RANGE_MAX: u16 = 2299;

/// Port Manager runtime configuration, resolved from the environment.
#[derive(Debug, Clone)]
pub struct PortManagerConfig {
    /// Inclusive lower bound of the lease range (`PORT_RANGE_MIN`).
    pub range_min: u16,
    /// Inclusive upper bound of the lease range (`PORT_RANGE_MAX`).
    pub range_max: u16,
    /// Shared bearer token required on every API call (`PORT_MANAGER_TOKEN`).
    pub token: String,
    /// Path of the durable lease file (`PORT_LEASE_FILE`).
    pub lease_file: String,
}

impl PortManagerConfig {
    /// Resolve configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when `PORT_MANAGER_TOKEN` is missing or the range bounds are
    /// unparseable or inverted. The token is a startup invariant: the server
    /// refuses to run open.
    pub fn from_env() -> Result<Self, PortError> {
        let range_min = parse_port_var("PORT_RANGE_MIN", DEFAULT_RANGE_MIN)?;
        let range_max = parse_port_var("PORT_RANGE_MAX", DEFAULT_RANGE_MAX)?;
        if range_min > range_max {
            return Err(PortError::Config(format!(
                "PORT_RANGE_MIN ({range_min}) exceeds PORT_RANGE_MAX ({range_max})"
            )));
        }

        let token = std::env::var("PORT_MANAGER_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                PortError::Config("PORT_MANAGER_TOKEN environment variable is required".to_owned())
            })?;

        let lease_file =
            std::env::var("PORT_LEASE_FILE").unwrap_or_else(|_| "port-leases.json".to_owned());

        Ok(Self {
            range_min,
            range_max,
            token,
            lease_file,
        })
    }
}

fn parse_port_var(name: &str, default: u16) -> Result<u16, PortError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u16>()
            .map_err(|e| PortError::Config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
