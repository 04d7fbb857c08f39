use async_trait::async_trait;

use netpilot_client::PortManagerClient;
use netpilot_core::{RetryPolicy, RouterId, retry};

use crate::error::AgentError;

/// The slice of the Port Manager the supervisor needs.
///
/// Production goes through [`PortManagerClient`] with bounded retry; tests
/// substitute a scripted ledger. The Agent never fabricates a port: when
/// the Port Manager stays unreachable past the retry budget, the error
/// surfaces to the UI.
#[async_trait]
pub trait LeaseApi: Send + Sync {
    async fn allocate(&self, router_id: &RouterId) -> Result<u16, AgentError>;
    async fn lookup(&self, router_id: &RouterId) -> Result<Option<u16>, AgentError>;
    async fn release(&self, router_id: &RouterId) -> Result<(), AgentError>;
}

/// [`LeaseApi`] over the Port Manager HTTP API.
pub struct PortManagerLeases {
    client: PortManagerClient,
    policy: RetryPolicy,
}

impl PortManagerLeases {
    #[must_use]
    pub fn new(client: PortManagerClient) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl LeaseApi for PortManagerLeases {
    async fn allocate(&self, router_id: &RouterId) -> Result<u16, AgentError> {
        retry(self.policy, netpilot_client::ClientError::is_retryable, || {
            self.client.allocate(router_id)
        })
        .await
        .map_err(|e| AgentError::PortManager(e.to_string()))
    }

    async fn lookup(&self, router_id: &RouterId) -> Result<Option<u16>, AgentError> {
        retry(self.policy, netpilot_client::ClientError::is_retryable, || {
            self.client.lookup_router(router_id)
        })
        .await
        .map_err(|e| AgentError::PortManager(e.to_string()))
    }

    async fn release(&self, router_id: &RouterId) -> Result<(), AgentError> {
        retry(self.policy, netpilot_client::ClientError::is_retryable, || {
            self.client.release(router_id)
        })
        .await
        .map(|_| ())
        .map_err(|e| AgentError::PortManager(e.to_string()))
    }
}
