use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use netpilot_core::{
    CommandResponse, DeviceCommandRequest, DeviceMonitorRequest, ListKind, ModeCommandRequest,
    MonitorPeriod, RateCommandRequest, RouterId, RouterRequest, SessionId, SessionRequest,
};

use crate::error::ClientError;

/// Default request timeout. Individual commands on the Commands-Server side
/// run under their own deadlines; this bound covers the whole HTTP exchange.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// The Commands-Server surface the orchestrator depends on.
///
/// Implemented by [`CommandsClient`] over HTTP; tests substitute a scripted
/// mock behind `Arc<dyn CommandsApi>`.
#[async_trait]
pub trait CommandsApi: Send + Sync {
    /// Register a session. Idempotent; `restart` tears down existing state.
    async fn start_session(
        &self,
        session_id: SessionId,
        restart: bool,
    ) -> Result<CommandResponse, ClientError>;

    /// Tear down a session and close its pooled SSH connections.
    async fn end_session(&self, session_id: SessionId) -> Result<CommandResponse, ClientError>;

    /// Reset the session's idle TTL.
    async fn refresh_session(&self, session_id: SessionId) -> Result<CommandResponse, ClientError>;

    /// Run a network scan; data is `[{ip, mac, hostname}]`.
    async fn scan(
        &self,
        session_id: SessionId,
        router_id: &RouterId,
    ) -> Result<CommandResponse, ClientError>;

    /// Block a device outright.
    async fn block(
        &self,
        session_id: SessionId,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<CommandResponse, ClientError>;

    /// Lift an outright block.
    async fn unblock(
        &self,
        session_id: SessionId,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<CommandResponse, ClientError>;

    /// Add a device to the white- or blacklist.
    async fn list_add(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<CommandResponse, ClientError>;

    /// Remove a device from the white- or blacklist.
    async fn list_remove(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<CommandResponse, ClientError>;

    /// Read the router-side list membership.
    async fn list_entries(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
    ) -> Result<CommandResponse, ClientError>;

    /// Activate or deactivate a list mode.
    async fn set_mode(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
        active: bool,
    ) -> Result<CommandResponse, ClientError>;

    /// Change a list's bandwidth rate limit.
    async fn set_rate(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
        rate: u16,
    ) -> Result<CommandResponse, ClientError>;

    /// Query aggregate bandwidth usage for a period.
    async fn monitor(
        &self,
        period: MonitorPeriod,
        session_id: SessionId,
        router_id: &RouterId,
    ) -> Result<CommandResponse, ClientError>;

    /// Query bandwidth usage for a single device.
    async fn monitor_device(
        &self,
        session_id: SessionId,
        router_id: &RouterId,
        mac: &str,
        period: MonitorPeriod,
    ) -> Result<CommandResponse, ClientError>;
}

/// HTTP client for the Commands-Server.
///
/// The Auth/DB orchestrator is the only caller; the channel is trusted, so
/// requests carry no credential beyond the session id.
#[derive(Debug, Clone)]
pub struct CommandsClient {
    client: Client,
    base_url: String,
}

/// Builder for configuring a [`CommandsClient`].
#[derive(Debug)]
pub struct CommandsClientBuilder {
    base_url: String,
    timeout: Duration,
    client: Option<Client>,
}

impl CommandsClientBuilder {
    /// Create a new builder with the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            client: None,
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a custom reqwest Client.
    #[must_use]
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<CommandsClient, ClientError> {
        let client = match self.client {
            Some(c) => c,
            None => Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| ClientError::Configuration(e.to_string()))?,
        };
        Ok(CommandsClient {
            client,
            base_url: self.base_url,
        })
    }
}

impl CommandsClient {
    /// Create a client with default configuration.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        CommandsClientBuilder::new(base_url).build()
    }

    /// Create a builder for advanced configuration.
    pub fn builder(base_url: impl Into<String>) -> CommandsClientBuilder {
        CommandsClientBuilder::new(base_url)
    }

    /// The base URL this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a body and decode the uniform envelope.
    ///
    /// The Commands-Server answers failures with the envelope too, so any
    /// decodable body is a valid result regardless of HTTP status.
    async fn post<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<CommandResponse, ClientError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        response
            .json::<CommandResponse>()
            .await
            .map_err(|e| ClientError::Deserialization(e.to_string()))
    }

    /// Check Commands-Server liveness.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl CommandsApi for CommandsClient {
    async fn start_session(
        &self,
        session_id: SessionId,
        restart: bool,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            "/session/start",
            &SessionRequest {
                session_id,
                restart,
            },
        )
        .await
    }

    async fn end_session(&self, session_id: SessionId) -> Result<CommandResponse, ClientError> {
        self.post(
            "/session/end",
            &SessionRequest {
                session_id,
                restart: false,
            },
        )
        .await
    }

    async fn refresh_session(&self, session_id: SessionId) -> Result<CommandResponse, ClientError> {
        self.post(
            "/session/refresh",
            &SessionRequest {
                session_id,
                restart: false,
            },
        )
        .await
    }

    async fn scan(
        &self,
        session_id: SessionId,
        router_id: &RouterId,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            "/network/scan",
            &RouterRequest {
                session_id,
                router_id: router_id.clone(),
            },
        )
        .await
    }

    async fn block(
        &self,
        session_id: SessionId,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            "/block",
            &DeviceCommandRequest {
                session_id,
                router_id: router_id.clone(),
                ip: ip.to_owned(),
            },
        )
        .await
    }

    async fn unblock(
        &self,
        session_id: SessionId,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            "/unblock",
            &DeviceCommandRequest {
                session_id,
                router_id: router_id.clone(),
                ip: ip.to_owned(),
            },
        )
        .await
    }

    async fn list_add(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            &format!("/{kind}/add"),
            &DeviceCommandRequest {
                session_id,
                router_id: router_id.clone(),
                ip: ip.to_owned(),
            },
        )
        .await
    }

    async fn list_remove(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            &format!("/{kind}/remove"),
            &DeviceCommandRequest {
                session_id,
                router_id: router_id.clone(),
                ip: ip.to_owned(),
            },
        )
        .await
    }

    async fn list_entries(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            &format!("/{kind}/list"),
            &RouterRequest {
                session_id,
                router_id: router_id.clone(),
            },
        )
        .await
    }

    async fn set_mode(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
        active: bool,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            &format!("/{kind}/mode"),
            &ModeCommandRequest {
                session_id,
                router_id: router_id.clone(),
                active,
            },
        )
        .await
    }

    async fn set_rate(
        &self,
        kind: ListKind,
        session_id: SessionId,
        router_id: &RouterId,
        rate: u16,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            &format!("/{kind}/limit-rate"),
            &RateCommandRequest {
                session_id,
                router_id: router_id.clone(),
                rate,
            },
        )
        .await
    }

    async fn monitor(
        &self,
        period: MonitorPeriod,
        session_id: SessionId,
        router_id: &RouterId,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            &format!("/monitor/{}", period.as_str()),
            &RouterRequest {
                session_id,
                router_id: router_id.clone(),
            },
        )
        .await
    }

    async fn monitor_device(
        &self,
        session_id: SessionId,
        router_id: &RouterId,
        mac: &str,
        period: MonitorPeriod,
    ) -> Result<CommandResponse, ClientError> {
        self.post(
            &format!("/monitor/device/{mac}"),
            &DeviceMonitorRequest {
                session_id,
                router_id: router_id.clone(),
                mac: mac.to_owned(),
                period,
            },
        )
        .await
    }
}
