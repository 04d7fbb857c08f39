use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use netpilot_core::{PortLease, RouterId};

use crate::error::PortError;

/// Durable backing for the lease registry.
///
/// The allocator writes through to this store before an allocation becomes
/// visible, and reconstructs its in-memory sets from `load_all` on restart.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read every persisted lease.
    async fn load_all(&self) -> Result<Vec<PortLease>, PortError>;

    /// Persist a lease, replacing any previous lease for the same router.
    async fn put(&self, lease: &PortLease) -> Result<(), PortError>;

    /// Remove the lease for a router. Removing an absent lease is fine.
    async fn remove(&self, router_id: &RouterId) -> Result<(), PortError>;
}

/// JSON-file lease store.
///
/// The whole registry is small (one row per router), so every mutation
/// rewrites the file atomically: serialize to a sibling temp file, then
/// rename over the target.
pub struct FileLeaseStore {
    path: PathBuf,
    /// Serialises writers so concurrent mutations cannot interleave the
    /// temp-file dance.
    write_lock: Mutex<()>,
}

impl FileLeaseStore {
    /// Create a store backed by the given path. The file is created on the
    /// first write; a missing file reads as an empty registry.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_map(&self) -> Result<HashMap<String, PortLease>, PortError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| PortError::Store(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(PortError::Store(e.to_string())),
        }
    }

    async fn write_map(&self, map: &HashMap<String, PortLease>) -> Result<(), PortError> {
        let bytes =
            serde_json::to_vec_pretty(map).map_err(|e| PortError::Store(e.to_string()))?;
        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| PortError::Store(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PortError::Store(e.to_string()))?;
        debug!(path = %self.path.display(), leases = map.len(), "lease file written");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("leases.json"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl LeaseStore for FileLeaseStore {
    async fn load_all(&self) -> Result<Vec<PortLease>, PortError> {
        Ok(self.read_map().await?.into_values().collect())
    }

    async fn put(&self, lease: &PortLease) -> Result<(), PortError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(lease.router_id.to_string(), lease.clone());
        self.write_map(&map).await
    }

    async fn remove(&self, router_id: &RouterId) -> Result<(), PortError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        if map.remove(router_id.as_str()).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }
}

/// In-memory lease store for tests.
#[derive(Default)]
pub struct MemoryLeaseStore {
    leases: Mutex<HashMap<String, PortLease>>,
}

impl MemoryLeaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing leases (restart scenarios).
    pub async fn seed(&self, leases: Vec<PortLease>) {
        let mut map = self.leases.lock().await;
        for lease in leases {
            map.insert(lease.router_id.to_string(), lease);
        }
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn load_all(&self) -> Result<Vec<PortLease>, PortError> {
        Ok(self.leases.lock().await.values().cloned().collect())
    }

    async fn put(&self, lease: &PortLease) -> Result<(), PortError> {
        self.leases
            .lock()
            .await
            .insert(lease.router_id.to_string(), lease.clone());
        Ok(())
    }

    async fn remove(&self, router_id: &RouterId) -> Result<(), PortError> {
        self.leases.lock().await.remove(router_id.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn lease(id: &str, port: u16) -> PortLease {
        PortLease {
            router_id: RouterId::parse(id).unwrap(),
            port,
            leased_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLeaseStore::new(dir.path().join("leases.json"));

        assert!(store.load_all().await.unwrap().is_empty());

        store.put(&lease("aabbccddeeff", 2201)).await.unwrap();
        store.put(&lease("ffeeddccbbaa", 2202)).await.unwrap();

        let mut loaded = store.load_all().await.unwrap();
        loaded.sort_by_key(|l| l.port);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].port, 2201);

        store
            .remove(&RouterId::parse("aabbccddeeff").unwrap())
            .await
            .unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].port, 2202);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.json");

        let store = FileLeaseStore::new(&path);
        store.put(&lease("aabbccddeeff", 2207)).await.unwrap();
        drop(store);

        let reopened = FileLeaseStore::new(&path);
        let loaded = reopened.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].port, 2207);
    }

    #[tokio::test]
    async fn removing_absent_lease_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLeaseStore::new(dir.path().join("leases.json"));
        store
            .remove(&RouterId::parse("aabbccddeeff").unwrap())
            .await
            .unwrap();
    }
}
