use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AgentError;

/// Output of one command on the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_status: u32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Turn a non-zero exit into a provisioning error.
    pub fn into_checked(self) -> Result<Self, AgentError> {
        if self.success() {
            Ok(self)
        } else {
            Err(AgentError::Provision(format!(
                "exit {}: {}",
                self.exit_status,
                self.stderr.trim()
            )))
        }
    }
}

/// A shell on the router, reached over the LAN with the locally configured
/// credential (trust-on-first-use, set up by the user out of band).
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, command: &str) -> Result<ExecOutput, AgentError>;
    async fn close(&self);
}

/// Dials router shells. Tests substitute a scripted implementation.
#[async_trait]
pub trait RouterDialer: Send + Sync {
    async fn dial(&self) -> Result<Arc<dyn RemoteShell>, AgentError>;
}

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Trust-on-first-use: the user points the Agent at their own router.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// russh-backed shell into the router.
pub struct RusshRemote {
    handle: Mutex<Handle<ClientHandler>>,
}

#[async_trait]
impl RemoteShell for RusshRemote {
    async fn exec(&self, command: &str) -> Result<ExecOutput, AgentError> {
        let handle = self.handle.lock().await;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| AgentError::RouterUnreachable(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| AgentError::RouterUnreachable(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = 0u32;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = code,
                _ => {}
            }
        }

        Ok(ExecOutput {
            exit_status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn close(&self) {
        let handle = self.handle.lock().await;
        let _ = handle
            .disconnect(Disconnect::ByApplication, "done", "en")
            .await;
    }
}

/// Production dialer: SSH to the router's LAN address.
pub struct RusshDialer {
    host: String,
    user: String,
    password: String,
    config: Arc<client::Config>,
}

impl RusshDialer {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            config: Arc::new(client::Config::default()),
        }
    }
}

#[async_trait]
impl RouterDialer for RusshDialer {
    async fn dial(&self) -> Result<Arc<dyn RemoteShell>, AgentError> {
        debug!(host = %self.host, "dialing router");
        let mut handle = client::connect(
            Arc::clone(&self.config),
            (self.host.as_str(), 22),
            ClientHandler,
        )
        .await
        .map_err(|e| AgentError::RouterUnreachable(e.to_string()))?;

        let auth = handle
            .authenticate_password(&self.user, &self.password)
            .await
            .map_err(|e| AgentError::RouterAuth(e.to_string()))?;
        if !auth.success() {
            return Err(AgentError::RouterAuth(format!(
                "password rejected for user {}",
                self.user
            )));
        }

        Ok(Arc::new(RusshRemote {
            handle: Mutex::new(handle),
        }))
    }
}
