pub mod memory;
pub mod migrations;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use netpilot_core::{Device, ListKind, RouterId, SessionId};

pub use memory::MemoryUserStore;
pub use postgres::PostgresUserStore;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness or state invariant would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The backing database failed.
    #[error("backend error: {0}")]
    Backend(String),
}

/// A registered end user.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub oauth_subject: String,
    pub requires_2fa: bool,
    pub has_2fa_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A login session, mirrored to the Commands-Server once announced.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub session_id: SessionId,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub twofa_verified: bool,
    /// Whether `StartSession` has been acknowledged by the Commands-Server.
    pub mirrored: bool,
}

impl UserSession {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A device seen by a scan, upserted per `(user, router, ip)`.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub user_id: Uuid,
    pub router_id: RouterId,
    pub ip: String,
    pub mac: String,
    pub hostname: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A white/blacklist membership row.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub user_id: Uuid,
    pub router_id: RouterId,
    pub ip: String,
    pub created_at: DateTime<Utc>,
}

/// Mode/rate state per `(user, router)`. At most one mode active at a time.
#[derive(Debug, Clone, Default)]
pub struct ModeState {
    pub whitelist_active: bool,
    pub blacklist_active: bool,
    pub whitelist_rate: Option<u16>,
    pub blacklist_rate: Option<u16>,
}

/// Persisted 2FA material for one user.
#[derive(Debug, Clone)]
pub struct TwoFactorSettings {
    pub user_id: Uuid,
    /// `ENC[AES256-GCM,...]` envelope around the base32 seed.
    pub encrypted_seed: String,
    pub enabled: bool,
    /// Argon2 hashes of the unused backup codes.
    pub backup_code_hashes: Vec<String>,
    pub setup_token: Option<Uuid>,
    pub setup_expires_at: Option<DateTime<Utc>>,
}

/// 2FA failure counters and lockout window for one user.
#[derive(Debug, Clone, Default)]
pub struct TwoFactorAttempts {
    pub failed_attempts: u32,
    /// Index into the escalating lockout ladder; grows with each lockout.
    pub lockout_level: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// The persistence surface of the Auth/DB server.
///
/// Exclusively owns all durable user data. Composite mutating operations
/// are atomic: the Postgres implementation wraps them in one transaction,
/// the in-memory one in one mutex hold. Nothing here talks to the network.
#[async_trait]
pub trait UserStore: Send + Sync {
    // -- users ------------------------------------------------------------

    /// Find a user by OAuth subject, creating one on first login.
    async fn find_or_create_user(&self, subject: &str, email: &str) -> Result<User, StoreError>;

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// Flip the `has_2fa_enabled` flag on the user row.
    async fn set_user_2fa_enabled(&self, user_id: Uuid, enabled: bool) -> Result<(), StoreError>;

    // -- sessions ---------------------------------------------------------

    async fn create_session(&self, session: &UserSession) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: SessionId)
    -> Result<Option<UserSession>, StoreError>;

    async fn mark_session_verified(&self, session_id: SessionId) -> Result<(), StoreError>;

    async fn set_session_mirrored(
        &self,
        session_id: SessionId,
        mirrored: bool,
    ) -> Result<(), StoreError>;

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError>;

    // -- router ownership -------------------------------------------------

    /// The user's active router, if bound.
    async fn active_router(&self, user_id: Uuid) -> Result<Option<RouterId>, StoreError>;

    /// Whether `(user, router)` is an active ownership row.
    async fn is_owner(&self, user_id: Uuid, router_id: &RouterId) -> Result<bool, StoreError>;

    /// Bind the user to a router, deactivating any previous binding
    /// (one active router per user in v1).
    async fn bind_router(&self, user_id: Uuid, router_id: &RouterId) -> Result<(), StoreError>;

    // -- devices ----------------------------------------------------------

    /// Upsert scan results keyed by `(user, router, ip)` in one atomic
    /// step: `last_seen` and writeable fields update, absent devices are
    /// never deleted.
    async fn upsert_devices(
        &self,
        user_id: Uuid,
        router_id: &RouterId,
        devices: &[Device],
    ) -> Result<(), StoreError>;

    async fn list_devices(
        &self,
        user_id: Uuid,
        router_id: &RouterId,
    ) -> Result<Vec<DeviceRecord>, StoreError>;

    // -- list membership --------------------------------------------------

    /// Whether `(user, router, ip)` is a member of the list.
    async fn list_contains(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<bool, StoreError>;

    async fn add_list_entry(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<(), StoreError>;

    async fn remove_list_entry(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<(), StoreError>;

    async fn list_entries(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
    ) -> Result<Vec<ListEntry>, StoreError>;

    // -- mode state -------------------------------------------------------

    async fn mode_state(
        &self,
        user_id: Uuid,
        router_id: &RouterId,
    ) -> Result<ModeState, StoreError>;

    /// Persist a mode flag. Returns [`StoreError::Conflict`] if activating
    /// one mode while the other is active; both-active can never be stored.
    async fn set_mode_active(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        active: bool,
    ) -> Result<(), StoreError>;

    async fn set_rate(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        rate: u16,
    ) -> Result<(), StoreError>;

    // -- 2fa --------------------------------------------------------------

    async fn get_twofa(&self, user_id: Uuid) -> Result<Option<TwoFactorSettings>, StoreError>;

    /// Store a pending (not yet verified) 2FA setup, replacing any prior
    /// pending one. Enabled settings are not overwritten.
    async fn put_pending_twofa(
        &self,
        user_id: Uuid,
        encrypted_seed: &str,
        setup_token: Uuid,
        setup_expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Promote a pending setup to enabled: store the backup-code hashes,
    /// clear the setup token, and flip the user flag, atomically.
    async fn enable_twofa(
        &self,
        user_id: Uuid,
        backup_code_hashes: &[String],
    ) -> Result<(), StoreError>;

    /// Remove all 2FA material and counters for the user, atomically.
    async fn disable_twofa(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Remove one consumed backup code hash.
    async fn remove_backup_code(&self, user_id: Uuid, hash: &str) -> Result<(), StoreError>;

    async fn get_twofa_attempts(&self, user_id: Uuid)
    -> Result<TwoFactorAttempts, StoreError>;

    async fn put_twofa_attempts(
        &self,
        user_id: Uuid,
        attempts: &TwoFactorAttempts,
    ) -> Result<(), StoreError>;
}
