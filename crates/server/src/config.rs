use axum_extra::extract::cookie::Key;

use netpilot_crypto::{MasterKey, parse_master_key};

/// Auth/DB server configuration, resolved from the environment.
///
/// The signing and encryption keys are startup invariants: the process
/// refuses to boot without them rather than generating throwaway keys.
pub struct ServerConfig {
    /// Postgres connection string, either `DATABASE_URL` or assembled from
    /// `DB_HOST`/`DB_PORT`/`DB_USERNAME`/`DB_PASSWORD`/`DB_NAME`.
    pub database_url: String,
    pub db_pool_size: u32,
    /// Cookie signing key derived from `SECRET_KEY`.
    pub cookie_key: Key,
    /// AES key for TOTP seeds, from `TOTP_ENCRYPTION_KEY`.
    pub totp_key: MasterKey,
    pub google_client_id: String,
    pub google_client_secret: String,
    /// Where Google redirects back to (`OAUTH_REDIRECT_URL`).
    pub oauth_redirect_url: String,
    /// Base URL of the Commands-Server (`COMMANDS_SERVER_URL`).
    pub commands_server_url: String,
    /// Commands-Server HTTP timeout (`COMMAND_TIMEOUT_MS`).
    pub command_timeout: std::time::Duration,
    /// Session lifetime (`SESSION_TTL_HOURS`).
    pub session_ttl: chrono::Duration,
}

impl ServerConfig {
    /// Resolve configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails on any missing required variable or malformed key material.
    pub fn from_env() -> Result<Self, String> {
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => {
                let host = required("DB_HOST")?;
                let port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".to_owned());
                let user = required("DB_USERNAME")?;
                let password = required("DB_PASSWORD")?;
                let name = required("DB_NAME")?;
                format!("postgres://{user}:{password}@{host}:{port}/{name}")
            }
        };

        let secret = required("SECRET_KEY")?;
        if secret.len() < 64 {
            return Err("SECRET_KEY must be at least 64 bytes".to_owned());
        }
        let cookie_key = Key::from(secret.as_bytes());

        let totp_key = parse_master_key(&required("TOTP_ENCRYPTION_KEY")?)
            .map_err(|e| format!("invalid TOTP_ENCRYPTION_KEY: {e}"))?;

        Ok(Self {
            database_url,
            db_pool_size: parse_or("DB_POOL_SIZE", 10)?,
            cookie_key,
            totp_key,
            google_client_id: required("GOOGLE_CLIENT_ID")?,
            google_client_secret: required("GOOGLE_CLIENT_SECRET")?,
            oauth_redirect_url: std::env::var("OAUTH_REDIRECT_URL")
                .unwrap_or_else(|_| "http://localhost:8080/authorize".to_owned()),
            commands_server_url: required("COMMANDS_SERVER_URL")?,
            command_timeout: std::time::Duration::from_millis(u64::from(parse_or(
                "COMMAND_TIMEOUT_MS",
                45_000,
            )?)),
            session_ttl: chrono::Duration::hours(i64::from(parse_or("SESSION_TTL_HOURS", 24)?)),
        })
    }
}

fn required(name: &str) -> Result<String, String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("{name} environment variable is required"))
}

fn parse_or(name: &str, default: u32) -> Result<u32, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid {name}: {e}")),
        Err(_) => Ok(default),
    }
}
