use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use netpilot_core::{Device, ListKind, RouterId, SessionId};

use super::{
    DeviceRecord, ListEntry, ModeState, StoreError, TwoFactorAttempts, TwoFactorSettings, User,
    UserSession, UserStore,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    users_by_subject: HashMap<String, Uuid>,
    sessions: HashMap<SessionId, UserSession>,
    /// `(user, router)` rows with an active flag; one active per user.
    routers: HashMap<(Uuid, String), bool>,
    devices: HashMap<(Uuid, String, String), DeviceRecord>,
    lists: HashMap<(ListKind, Uuid, String, String), ListEntry>,
    modes: HashMap<(Uuid, String), ModeState>,
    twofa: HashMap<Uuid, TwoFactorSettings>,
    attempts: HashMap<Uuid, TwoFactorAttempts>,
}

/// In-memory [`UserStore`] for the test-suite. One mutex hold per
/// operation gives the same atomicity the Postgres transactions do.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<Inner>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_or_create_user(&self, subject: &str, email: &str) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.users_by_subject.get(subject) {
            let user = inner.users[id].clone();
            return Ok(user);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_owned(),
            oauth_subject: subject.to_owned(),
            requires_2fa: false,
            has_2fa_enabled: false,
            created_at: Utc::now(),
        };
        inner.users_by_subject.insert(subject.to_owned(), user.id);
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().await.users.get(&user_id).cloned())
    }

    async fn set_user_2fa_enabled(&self, user_id: Uuid, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        user.has_2fa_enabled = enabled;
        Ok(())
    }

    async fn create_session(&self, session: &UserSession) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&session.session_id) {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        inner.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<UserSession>, StoreError> {
        Ok(self.inner.lock().await.sessions.get(&session_id).cloned())
    }

    async fn mark_session_verified(&self, session_id: SessionId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        session.twofa_verified = true;
        Ok(())
    }

    async fn set_session_mirrored(
        &self,
        session_id: SessionId,
        mirrored: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        session.mirrored = mirrored;
        Ok(())
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        self.inner.lock().await.sessions.remove(&session_id);
        Ok(())
    }

    async fn active_router(&self, user_id: Uuid) -> Result<Option<RouterId>, StoreError> {
        let inner = self.inner.lock().await;
        for ((uid, router), active) in &inner.routers {
            if *uid == user_id && *active {
                return Ok(Some(RouterId::parse(router).map_err(|e| {
                    StoreError::Backend(format!("corrupt router id: {e}"))
                })?));
            }
        }
        Ok(None)
    }

    async fn is_owner(&self, user_id: Uuid, router_id: &RouterId) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .routers
            .get(&(user_id, router_id.to_string()))
            .copied()
            .unwrap_or(false))
    }

    async fn bind_router(&self, user_id: Uuid, router_id: &RouterId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for ((uid, _), active) in inner.routers.iter_mut() {
            if *uid == user_id {
                *active = false;
            }
        }
        inner
            .routers
            .insert((user_id, router_id.to_string()), true);
        Ok(())
    }

    async fn upsert_devices(
        &self,
        user_id: Uuid,
        router_id: &RouterId,
        devices: &[Device],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        for device in devices {
            let key = (user_id, router_id.to_string(), device.ip.clone());
            inner
                .devices
                .entry(key)
                .and_modify(|record| {
                    record.mac = device.mac.clone();
                    record.hostname = device.hostname.clone();
                    record.last_seen = now;
                })
                .or_insert_with(|| DeviceRecord {
                    user_id,
                    router_id: router_id.clone(),
                    ip: device.ip.clone(),
                    mac: device.mac.clone(),
                    hostname: device.hostname.clone(),
                    first_seen: now,
                    last_seen: now,
                });
        }
        Ok(())
    }

    async fn list_devices(
        &self,
        user_id: Uuid,
        router_id: &RouterId,
    ) -> Result<Vec<DeviceRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut records: Vec<DeviceRecord> = inner
            .devices
            .values()
            .filter(|d| d.user_id == user_id && d.router_id == *router_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.ip.cmp(&b.ip));
        Ok(records)
    }

    async fn list_contains(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .lists
            .contains_key(&(kind, user_id, router_id.to_string(), ip.to_owned())))
    }

    async fn add_list_entry(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (kind, user_id, router_id.to_string(), ip.to_owned());
        if inner.lists.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{ip} already in {kind}")));
        }
        inner.lists.insert(
            key,
            ListEntry {
                user_id,
                router_id: router_id.clone(),
                ip: ip.to_owned(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn remove_list_entry(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .lists
            .remove(&(kind, user_id, router_id.to_string(), ip.to_owned()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("{ip} not in {kind}")))
    }

    async fn list_entries(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
    ) -> Result<Vec<ListEntry>, StoreError> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<ListEntry> = inner
            .lists
            .iter()
            .filter(|((k, uid, rid, _), _)| {
                *k == kind && *uid == user_id && rid == router_id.as_str()
            })
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by(|a, b| a.ip.cmp(&b.ip));
        Ok(entries)
    }

    async fn mode_state(
        &self,
        user_id: Uuid,
        router_id: &RouterId,
    ) -> Result<ModeState, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .modes
            .get(&(user_id, router_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_mode_active(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        active: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .modes
            .entry((user_id, router_id.to_string()))
            .or_default();
        if active {
            let other_active = match kind {
                ListKind::Whitelist => state.blacklist_active,
                ListKind::Blacklist => state.whitelist_active,
            };
            if other_active {
                return Err(StoreError::Conflict(format!(
                    "{} mode is already active",
                    kind.other()
                )));
            }
        }
        match kind {
            ListKind::Whitelist => state.whitelist_active = active,
            ListKind::Blacklist => state.blacklist_active = active,
        }
        Ok(())
    }

    async fn set_rate(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        rate: u16,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .modes
            .entry((user_id, router_id.to_string()))
            .or_default();
        match kind {
            ListKind::Whitelist => state.whitelist_rate = Some(rate),
            ListKind::Blacklist => state.blacklist_rate = Some(rate),
        }
        Ok(())
    }

    async fn get_twofa(&self, user_id: Uuid) -> Result<Option<TwoFactorSettings>, StoreError> {
        Ok(self.inner.lock().await.twofa.get(&user_id).cloned())
    }

    async fn put_pending_twofa(
        &self,
        user_id: Uuid,
        encrypted_seed: &str,
        setup_token: Uuid,
        setup_expires_at: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.twofa.get(&user_id).is_some_and(|t| t.enabled) {
            return Err(StoreError::Conflict(
                "two-factor auth is already enabled".to_owned(),
            ));
        }
        inner.twofa.insert(
            user_id,
            TwoFactorSettings {
                user_id,
                encrypted_seed: encrypted_seed.to_owned(),
                enabled: false,
                backup_code_hashes: Vec::new(),
                setup_token: Some(setup_token),
                setup_expires_at: Some(setup_expires_at),
            },
        );
        Ok(())
    }

    async fn enable_twofa(
        &self,
        user_id: Uuid,
        backup_code_hashes: &[String],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let settings = inner
            .twofa
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("no pending setup for {user_id}")))?;
        settings.enabled = true;
        settings.backup_code_hashes = backup_code_hashes.to_vec();
        settings.setup_token = None;
        settings.setup_expires_at = None;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        user.has_2fa_enabled = true;
        user.requires_2fa = true;
        Ok(())
    }

    async fn disable_twofa(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.twofa.remove(&user_id);
        inner.attempts.remove(&user_id);
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.has_2fa_enabled = false;
            user.requires_2fa = false;
        }
        Ok(())
    }

    async fn remove_backup_code(&self, user_id: Uuid, hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let settings = inner
            .twofa
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("no 2fa settings for {user_id}")))?;
        settings.backup_code_hashes.retain(|h| h != hash);
        Ok(())
    }

    async fn get_twofa_attempts(
        &self,
        user_id: Uuid,
    ) -> Result<TwoFactorAttempts, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .attempts
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_twofa_attempts(
        &self,
        user_id: Uuid,
        attempts: &TwoFactorAttempts,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .attempts
            .insert(user_id, attempts.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(s: &str) -> RouterId {
        RouterId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent_per_subject() {
        let store = MemoryUserStore::new();
        let a = store
            .find_or_create_user("google-123", "a@example.com")
            .await
            .unwrap();
        let b = store
            .find_or_create_user("google-123", "a@example.com")
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn bind_router_keeps_one_active() {
        let store = MemoryUserStore::new();
        let user = store
            .find_or_create_user("google-123", "a@example.com")
            .await
            .unwrap();

        store.bind_router(user.id, &rid("aabbccddeeff")).await.unwrap();
        store.bind_router(user.id, &rid("ffeeddccbbaa")).await.unwrap();

        assert!(!store.is_owner(user.id, &rid("aabbccddeeff")).await.unwrap());
        assert!(store.is_owner(user.id, &rid("ffeeddccbbaa")).await.unwrap());
        assert_eq!(
            store.active_router(user.id).await.unwrap(),
            Some(rid("ffeeddccbbaa"))
        );
    }

    #[tokio::test]
    async fn device_upsert_updates_last_seen_and_never_deletes() {
        let store = MemoryUserStore::new();
        let user = store
            .find_or_create_user("google-123", "a@example.com")
            .await
            .unwrap();
        let router = rid("aabbccddeeff");

        let first = vec![
            Device {
                ip: "192.168.1.10".into(),
                mac: "AA:BB:CC:11:22:33".into(),
                hostname: "phone".into(),
            },
            Device {
                ip: "192.168.1.20".into(),
                mac: "DE:AD:BE:EF:00:01".into(),
                hostname: "laptop".into(),
            },
        ];
        store.upsert_devices(user.id, &router, &first).await.unwrap();

        // Second scan: one device gone, one renamed.
        let second = vec![Device {
            ip: "192.168.1.10".into(),
            mac: "AA:BB:CC:11:22:33".into(),
            hostname: "phone-renamed".into(),
        }];
        store.upsert_devices(user.id, &router, &second).await.unwrap();

        let devices = store.list_devices(user.id, &router).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].hostname, "phone-renamed");
        assert_eq!(devices[1].hostname, "laptop");
    }

    #[tokio::test]
    async fn mode_mutual_exclusion_is_enforced() {
        let store = MemoryUserStore::new();
        let user = store
            .find_or_create_user("google-123", "a@example.com")
            .await
            .unwrap();
        let router = rid("aabbccddeeff");

        store
            .set_mode_active(ListKind::Blacklist, user.id, &router, true)
            .await
            .unwrap();
        let err = store
            .set_mode_active(ListKind::Whitelist, user.id, &router, true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Deactivate, then the other may activate.
        store
            .set_mode_active(ListKind::Blacklist, user.id, &router, false)
            .await
            .unwrap();
        store
            .set_mode_active(ListKind::Whitelist, user.id, &router, true)
            .await
            .unwrap();
        let state = store.mode_state(user.id, &router).await.unwrap();
        assert!(state.whitelist_active && !state.blacklist_active);
    }

    #[tokio::test]
    async fn duplicate_list_entry_is_conflict() {
        let store = MemoryUserStore::new();
        let user = store
            .find_or_create_user("google-123", "a@example.com")
            .await
            .unwrap();
        let router = rid("aabbccddeeff");

        store
            .add_list_entry(ListKind::Whitelist, user.id, &router, "192.168.1.10")
            .await
            .unwrap();
        let err = store
            .add_list_entry(ListKind::Whitelist, user.id, &router, "192.168.1.10")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // The same ip in the other list is fine (memberships may coexist).
        store
            .add_list_entry(ListKind::Blacklist, user.id, &router, "192.168.1.10")
            .await
            .unwrap();
    }
}
