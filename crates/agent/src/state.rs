use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use netpilot_core::RouterId;

use crate::error::AgentError;

/// Where the tunnel stands, as last persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelPhase {
    /// Port acquired and state persisted; the on-router supervisor has not
    /// been started yet.
    Configured,
    /// The supervisor was started and left running.
    Connected,
    /// The user stopped the supervisor; the lease and port are kept for the
    /// next connect.
    Disconnected,
}

/// The Agent's single persisted blob. Exactly one per install.
///
/// If `port` is set, a matching lease exists in the Port Manager; the write
/// happens only after a successful allocation, and the file is cleared only
/// by an explicit user reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelState {
    pub router_id: RouterId,
    pub port: u16,
    pub vm_host: String,
    pub vm_user: String,
    pub phase: TunnelPhase,
}

/// Atomic load/save/clear of the tunnel state file.
pub struct TunnelStateFile {
    path: PathBuf,
}

impl TunnelStateFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state. A missing file means a fresh install.
    pub async fn load(&self) -> Result<Option<TunnelState>, AgentError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AgentError::State(format!("corrupt state file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::State(e.to_string())),
        }
    }

    /// Persist atomically: write a sibling temp file, then rename over the
    /// target, so a crash mid-write never leaves a torn blob.
    pub async fn save(&self, state: &TunnelState) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::State(e.to_string()))?;
        }
        let bytes =
            serde_json::to_vec_pretty(state).map_err(|e| AgentError::State(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| AgentError::State(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AgentError::State(e.to_string()))
    }

    /// Remove the state file. Only an explicit user reset calls this.
    pub async fn clear(&self) -> Result<(), AgentError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::State(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(phase: TunnelPhase) -> TunnelState {
        TunnelState {
            router_id: RouterId::parse("ffeeddccbbaa").unwrap(),
            port: 2207,
            vm_host: "203.0.113.7".to_owned(),
            vm_user: "netpilot".to_owned(),
            phase,
        }
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = TunnelStateFile::new(dir.path().join("tunnel-state.json"));
        assert!(file.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = TunnelStateFile::new(dir.path().join("tunnel-state.json"));

        file.save(&state(TunnelPhase::Configured)).await.unwrap();
        let loaded = file.load().await.unwrap().unwrap();
        assert_eq!(loaded, state(TunnelPhase::Configured));

        // Overwrite with a new phase, survives reload.
        file.save(&state(TunnelPhase::Connected)).await.unwrap();
        let loaded = file.load().await.unwrap().unwrap();
        assert_eq!(loaded.phase, TunnelPhase::Connected);
        assert_eq!(loaded.port, 2207);
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = TunnelStateFile::new(dir.path().join("nested/dir/tunnel-state.json"));
        file.save(&state(TunnelPhase::Configured)).await.unwrap();
        assert!(file.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = TunnelStateFile::new(dir.path().join("tunnel-state.json"));
        file.save(&state(TunnelPhase::Connected)).await.unwrap();
        file.clear().await.unwrap();
        file.clear().await.unwrap();
        assert!(file.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnel-state.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let file = TunnelStateFile::new(&path);
        assert!(matches!(
            file.load().await.unwrap_err(),
            AgentError::State(_)
        ));
    }
}
