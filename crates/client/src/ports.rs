use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use netpilot_core::{
    AllocateRequest, CommandError, PortLease, PortResponse, ReleaseRequest, ReleaseResponse,
    RouterId, RouterResponse,
};

use crate::error::ClientError;

/// Default request timeout for Port Manager calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error body produced by the Port Manager on failure.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: CommandError,
}

/// HTTP client for the Port Manager lease API.
///
/// Used by the Agent (allocate/release) and by the Commands-Server
/// (read-only lookups). All calls carry the shared bearer token.
#[derive(Debug, Clone)]
pub struct PortManagerClient {
    client: Client,
    base_url: String,
    token: String,
}

/// Builder for configuring a [`PortManagerClient`].
#[derive(Debug)]
pub struct PortManagerClientBuilder {
    base_url: String,
    token: String,
    timeout: Duration,
}

impl PortManagerClientBuilder {
    /// Create a new builder with the given base URL and bearer token.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<PortManagerClient, ClientError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        Ok(PortManagerClient {
            client,
            base_url: self.base_url,
            token: self.token,
        })
    }
}

impl PortManagerClient {
    /// Create a client with default configuration.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, ClientError> {
        PortManagerClientBuilder::new(base_url, token).build()
    }

    /// Create a builder for advanced configuration.
    pub fn builder(
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> PortManagerClientBuilder {
        PortManagerClientBuilder::new(base_url, token)
    }

    /// The base URL this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| ClientError::Deserialization(e.to_string()))
        } else {
            let body = response
                .json::<ErrorBody>()
                .await
                .map_err(|e| ClientError::Deserialization(e.to_string()))?;
            Err(ClientError::Api {
                code: body.error.code,
                message: body.error.message,
                retryable: body.error.retryable,
            })
        }
    }

    /// Allocate (or re-fetch) the tunnel port for a router. Idempotent.
    pub async fn allocate(&self, router_id: &RouterId) -> Result<u16, ClientError> {
        let url = format!("{}/allocate", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&AllocateRequest {
                router_id: router_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        Ok(Self::decode::<PortResponse>(response).await?.port)
    }

    /// Release the lease held by a router. Succeeds if nothing was leased.
    pub async fn release(&self, router_id: &RouterId) -> Result<bool, ClientError> {
        self.release_inner(ReleaseRequest {
            router_id: Some(router_id.to_string()),
            port: None,
        })
        .await
    }

    /// Release whatever lease holds the given port.
    pub async fn release_port(&self, port: u16) -> Result<bool, ClientError> {
        self.release_inner(ReleaseRequest {
            router_id: None,
            port: Some(port),
        })
        .await
    }

    async fn release_inner(&self, request: ReleaseRequest) -> Result<bool, ClientError> {
        let url = format!("{}/release", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        Ok(Self::decode::<ReleaseResponse>(response).await?.ok)
    }

    /// Look up the port leased to a router. `None` when no lease exists.
    pub async fn lookup_router(&self, router_id: &RouterId) -> Result<Option<u16>, ClientError> {
        let url = format!("{}/lookup?routerId={router_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        match Self::decode::<PortResponse>(response).await {
            Ok(body) => Ok(Some(body.port)),
            Err(ClientError::Api { code, .. }) if code == netpilot_core::ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Look up which router holds a port. `None` when the port is free.
    pub async fn lookup_port(&self, port: u16) -> Result<Option<RouterId>, ClientError> {
        let url = format!("{}/lookup?port={port}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        match Self::decode::<RouterResponse>(response).await {
            Ok(body) => Ok(Some(body.router_id)),
            Err(ClientError::Api { code, .. }) if code == netpilot_core::ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// List all active leases. Administrative.
    pub async fn active(&self) -> Result<Vec<PortLease>, ClientError> {
        let url = format!("{}/active", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        Self::decode(response).await
    }

    /// Check Port Manager liveness.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_trims_trailing_slash() {
        let client = PortManagerClient::builder("http://pm:7070/", "token")
            .build()
            .unwrap();
        assert_eq!(client.base_url(), "http://pm:7070");
    }
}
