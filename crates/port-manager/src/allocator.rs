use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use netpilot_core::{PortLease, RouterId};

use crate::error::PortError;
use crate::store::LeaseStore;

/// In-memory view of the port range, rebuilt from the store on startup.
struct AllocatorState {
    free: BTreeSet<u16>,
    by_router: HashMap<RouterId, PortLease>,
    by_port: HashMap<u16, RouterId>,
}

/// The single authority mapping routers to VM-side tunnel ports.
///
/// One mutex serialises every mutation; the lock spans the set update and
/// the write-through persist, so an allocation is never observable before
/// it is durable.
pub struct PortAllocator {
    min: u16,
    max: u16,
    store: Arc<dyn LeaseStore>,
    state: Mutex<AllocatorState>,
}

impl PortAllocator {
    /// Build the allocator for `[min, max]`, reconstructing state from the
    /// durable store. Persisted leases outside the configured range are
    /// ignored with a warning (the range was narrowed since they were
    /// written).
    pub async fn new(min: u16, max: u16, store: Arc<dyn LeaseStore>) -> Result<Self, PortError> {
        let mut free: BTreeSet<u16> = (min..=max).collect();
        let mut by_router = HashMap::new();
        let mut by_port = HashMap::new();

        for lease in store.load_all().await? {
            if lease.port < min || lease.port > max {
                warn!(router_id = %lease.router_id, port = lease.port, "dropping persisted lease outside configured range");
                continue;
            }
            if !free.remove(&lease.port) {
                warn!(router_id = %lease.router_id, port = lease.port, "duplicate persisted lease, keeping first");
                continue;
            }
            by_port.insert(lease.port, lease.router_id.clone());
            by_router.insert(lease.router_id.clone(), lease);
        }

        info!(min, max, active = by_router.len(), "port allocator ready");
        Ok(Self {
            min,
            max,
            store,
            state: Mutex::new(AllocatorState {
                free,
                by_router,
                by_port,
            }),
        })
    }

    /// Allocate a port for `router_id`, or return the existing lease's port.
    ///
    /// # Errors
    ///
    /// `NoFreePort` when the range is exhausted; `Store` when the
    /// write-through persist fails (the port stays free in that case).
    pub async fn allocate(&self, router_id: &RouterId) -> Result<u16, PortError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.by_router.get(router_id) {
            return Ok(existing.port);
        }

        let Some(port) = state.free.iter().next().copied() else {
            return Err(PortError::NoFreePort {
                min: self.min,
                max: self.max,
            });
        };

        let lease = PortLease {
            router_id: router_id.clone(),
            port,
            leased_at: Utc::now(),
        };

        // Not visible until persisted: the free set is only updated after
        // the store accepts the lease.
        self.store.put(&lease).await?;

        state.free.remove(&port);
        state.by_port.insert(port, router_id.clone());
        state.by_router.insert(router_id.clone(), lease);

        info!(%router_id, port, "port leased");
        Ok(port)
    }

    /// Release the lease held by `router_id`. Returns `true` if a lease
    /// existed. Releasing an unleased router succeeds.
    pub async fn release_router(&self, router_id: &RouterId) -> Result<bool, PortError> {
        let mut state = self.state.lock().await;
        let Some(lease) = state.by_router.remove(router_id) else {
            return Ok(false);
        };
        self.store.remove(router_id).await?;
        state.by_port.remove(&lease.port);
        state.free.insert(lease.port);
        info!(%router_id, port = lease.port, "port released");
        Ok(true)
    }

    /// Release whatever lease holds `port`. Returns `true` if one existed.
    pub async fn release_port(&self, port: u16) -> Result<bool, PortError> {
        let router_id = {
            let state = self.state.lock().await;
            state.by_port.get(&port).cloned()
        };
        match router_id {
            Some(id) => self.release_router(&id).await,
            None => Ok(false),
        }
    }

    /// The port leased to `router_id`, if any.
    pub async fn lookup_router(&self, router_id: &RouterId) -> Option<u16> {
        let state = self.state.lock().await;
        state.by_router.get(router_id).map(|l| l.port)
    }

    /// The router holding `port`, if any.
    pub async fn lookup_port(&self, port: u16) -> Option<RouterId> {
        let state = self.state.lock().await;
        state.by_port.get(&port).cloned()
    }

    /// Snapshot of all active leases, ordered by port.
    pub async fn active(&self) -> Vec<PortLease> {
        let state = self.state.lock().await;
        let mut leases: Vec<PortLease> = state.by_router.values().cloned().collect();
        leases.sort_by_key(|l| l.port);
        leases
    }

    /// Administrative expiry: drop leases older than `cutoff`. Returns the
    /// number removed.
    pub async fn expire(&self, cutoff: DateTime<Utc>) -> Result<usize, PortError> {
        let stale: Vec<RouterId> = {
            let state = self.state.lock().await;
            state
                .by_router
                .values()
                .filter(|l| l.leased_at < cutoff)
                .map(|l| l.router_id.clone())
                .collect()
        };
        let mut removed = 0;
        for router_id in stale {
            if self.release_router(&router_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use crate::store::MemoryLeaseStore;

    use super::*;

    fn rid(s: &str) -> RouterId {
        RouterId::parse(s).unwrap()
    }

    async fn allocator(min: u16, max: u16) -> PortAllocator {
        PortAllocator::new(min, max, Arc::new(MemoryLeaseStore::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn allocate_is_idempotent_per_router() {
        let alloc = allocator(2200, 2209).await;
        let first = alloc.allocate(&rid("aabbccddeeff")).await.unwrap();
        let second = alloc.allocate(&rid("aabbccddeeff")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn distinct_routers_get_distinct_ports() {
        let alloc = allocator(2200, 2209).await;
        let a = alloc.allocate(&rid("aabbccddeeff")).await.unwrap();
        let b = alloc.allocate(&rid("ffeeddccbbaa")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn exhausted_range_reports_no_free_port() {
        let alloc = allocator(2200, 2201).await;
        alloc.allocate(&rid("aabbccddee01")).await.unwrap();
        alloc.allocate(&rid("aabbccddee02")).await.unwrap();
        let err = alloc.allocate(&rid("aabbccddee03")).await.unwrap_err();
        assert!(matches!(err, PortError::NoFreePort { .. }));
    }

    #[tokio::test]
    async fn release_recycles_port() {
        let alloc = allocator(2200, 2200).await;
        let port = alloc.allocate(&rid("aabbccddeeff")).await.unwrap();
        assert!(alloc.release_router(&rid("aabbccddeeff")).await.unwrap());
        let next = alloc.allocate(&rid("ffeeddccbbaa")).await.unwrap();
        assert_eq!(port, next);
    }

    #[tokio::test]
    async fn release_of_unleased_router_succeeds() {
        let alloc = allocator(2200, 2209).await;
        assert!(!alloc.release_router(&rid("aabbccddeeff")).await.unwrap());
    }

    #[tokio::test]
    async fn release_by_port_clears_router_mapping() {
        let alloc = allocator(2200, 2209).await;
        let port = alloc.allocate(&rid("aabbccddeeff")).await.unwrap();
        assert!(alloc.release_port(port).await.unwrap());
        assert!(alloc.lookup_router(&rid("aabbccddeeff")).await.is_none());
        assert!(!alloc.release_port(port).await.unwrap());
    }

    #[tokio::test]
    async fn lookup_translates_both_directions() {
        let alloc = allocator(2200, 2209).await;
        let port = alloc.allocate(&rid("aabbccddeeff")).await.unwrap();
        assert_eq!(alloc.lookup_router(&rid("aabbccddeeff")).await, Some(port));
        assert_eq!(alloc.lookup_port(port).await, Some(rid("aabbccddeeff")));
        assert!(alloc.lookup_port(port + 1).await.is_none());
    }

    #[tokio::test]
    async fn restart_reconstructs_from_store() {
        let store = Arc::new(MemoryLeaseStore::new());
        {
            let alloc = PortAllocator::new(2200, 2209, Arc::clone(&store) as Arc<dyn LeaseStore>)
                .await
                .unwrap();
            alloc.allocate(&rid("ffeeddccbbaa")).await.unwrap();
        }

        let reborn = PortAllocator::new(2200, 2209, store).await.unwrap();
        // Same router, same port; a different router must not collide.
        let reused = reborn.allocate(&rid("ffeeddccbbaa")).await.unwrap();
        let fresh = reborn.allocate(&rid("aabbccddeeff")).await.unwrap();
        assert_eq!(reused, 2200);
        assert_ne!(fresh, reused);
    }

    #[tokio::test]
    async fn leases_outside_narrowed_range_are_dropped() {
        let store = Arc::new(MemoryLeaseStore::new());
        store
            .seed(vec![PortLease {
                router_id: rid("aabbccddeeff"),
                port: 2300,
                leased_at: Utc::now(),
            }])
            .await;
        let alloc = PortAllocator::new(2200, 2209, store).await.unwrap();
        assert!(alloc.lookup_router(&rid("aabbccddeeff")).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let alloc = Arc::new(allocator(2200, 2249).await);
        let mut handles = Vec::new();
        for i in 0..50u16 {
            let alloc = Arc::clone(&alloc);
            handles.push(tokio::spawn(async move {
                let id = rid(&format!("aabbccdd{i:04x}"));
                alloc.allocate(&id).await.unwrap()
            }));
        }
        let mut ports = BTreeSet::new();
        for handle in handles {
            assert!(ports.insert(handle.await.unwrap()));
        }
        assert_eq!(ports.len(), 50);
    }

    #[tokio::test]
    async fn expire_removes_only_stale_leases() {
        let store = Arc::new(MemoryLeaseStore::new());
        store
            .seed(vec![PortLease {
                router_id: rid("aabbccddee01"),
                port: 2200,
                leased_at: Utc::now() - Duration::days(30),
            }])
            .await;
        let alloc = PortAllocator::new(2200, 2209, store).await.unwrap();
        alloc.allocate(&rid("aabbccddee02")).await.unwrap();

        let removed = alloc.expire(Utc::now() - Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(alloc.lookup_router(&rid("aabbccddee01")).await.is_none());
        assert!(alloc.lookup_router(&rid("aabbccddee02")).await.is_some());
    }
}
