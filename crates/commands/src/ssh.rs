use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CommandsError;

/// Result of one shell command on the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub exit_status: u32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    /// Succeeded if the command exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Turn a non-zero exit into [`CommandsError::CommandFailed`].
    pub fn into_checked(self) -> Result<Self, CommandsError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandsError::CommandFailed {
                exit_status: self.exit_status,
                stderr: self.stderr.trim().to_owned(),
            })
        }
    }
}

/// A live shell into one router.
///
/// Implementations must be safe to share behind `Arc`; the dispatcher
/// serialises command execution per router, so `exec` never races with
/// itself for the same connection.
#[async_trait]
pub trait RouterShell: Send + Sync {
    /// Run one command and collect its output.
    async fn exec(&self, command: &str) -> Result<ShellOutput, CommandsError>;

    /// Whether the underlying transport is still open.
    async fn is_alive(&self) -> bool;

    /// Close the transport. Idempotent.
    async fn close(&self);
}

/// Opens shells into routers. The production connector dials the reverse
/// tunnel on `127.0.0.1:<port>`; tests substitute a scripted one.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn connect(&self, port: u16) -> Result<Arc<dyn RouterShell>, CommandsError>;
}

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // The tunnel terminates on loopback; the remote end is the router we
    // provisioned, so host-key pinning happens at provisioning time.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// SSH shell over the reverse tunnel, backed by russh.
pub struct RusshShell {
    handle: Mutex<Handle<ClientHandler>>,
    port: u16,
}

#[async_trait]
impl RouterShell for RusshShell {
    async fn exec(&self, command: &str) -> Result<ShellOutput, CommandsError> {
        let handle = self.handle.lock().await;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| CommandsError::TunnelDown {
                port: self.port,
                detail: e.to_string(),
            })?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| CommandsError::Internal(format!("exec failed: {e}")))?;

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

        Ok(ShellOutput {
            exit_status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn is_alive(&self) -> bool {
        !self.handle.lock().await.is_closed()
    }

    async fn close(&self) {
        let handle = self.handle.lock().await;
        let _ = handle
            .disconnect(Disconnect::ByApplication, "session ended", "en")
            .await;
    }
}

/// Production connector: SSH to `127.0.0.1:<tunnel port>` with the VM
/// user's credential.
pub struct RusshConnector {
    user: String,
    password: String,
    config: Arc<client::Config>,
}

impl RusshConnector {
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            config: Arc::new(client::Config::default()),
        }
    }
}

#[async_trait]
impl ShellConnector for RusshConnector {
    async fn connect(&self, port: u16) -> Result<Arc<dyn RouterShell>, CommandsError> {
        debug!(port, "opening ssh connection through tunnel");
        let handle = client::connect(
            Arc::clone(&self.config),
            ("127.0.0.1", port),
            ClientHandler,
        )
        .await
        .map_err(|e| CommandsError::TunnelDown {
            port,
            detail: e.to_string(),
        })?;

        let mut handle = handle;
        let auth = handle
            .authenticate_password(&self.user, &self.password)
            .await
            .map_err(|e| CommandsError::AuthFailed(e.to_string()))?;
        if !auth.success() {
            return Err(CommandsError::AuthFailed(format!(
                "password rejected for user {}",
                self.user
            )));
        }

        Ok(Arc::new(RusshShell {
            handle: Mutex::new(handle),
            port,
        }))
    }
}
