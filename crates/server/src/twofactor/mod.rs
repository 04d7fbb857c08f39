pub mod totp;

use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::rand_core::{OsRng, RngCore};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use netpilot_crypto::{ExposeSecret, SeedCipher};

use crate::error::ApiError;
use crate::store::{TwoFactorAttempts, User, UserStore};

/// How long a setup token stays valid.
const SETUP_TTL_MINUTES: i64 = 10;

/// Failed attempts before a lockout window starts.
const FAIL_THRESHOLD: u32 = 3;

/// Escalating lockout windows, indexed by how many lockouts came before.
const LOCKOUT_MINUTES: [i64; 4] = [5, 15, 60, 24 * 60];

/// Backup codes issued per enable.
const BACKUP_CODE_COUNT: usize = 8;

/// Result of starting a 2FA setup.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStart {
    pub setup_token: Uuid,
    /// Base32 seed, shown once for manual entry.
    pub secret: String,
    /// `otpauth://` URI the dashboard renders as a QR code.
    pub otpauth_uri: String,
}

/// Snapshot for `GET /api/2fa/status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub pending_setup: bool,
    pub is_locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    pub remaining_backup_codes: usize,
}

/// The 2FA behavioural contract: setup, verification with escalating
/// lockout, backup codes, and disable-with-valid-code.
pub struct TwoFactorService {
    store: Arc<dyn UserStore>,
    cipher: SeedCipher,
    issuer: String,
}

impl TwoFactorService {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, cipher: SeedCipher, issuer: impl Into<String>) -> Self {
        Self {
            store,
            cipher,
            issuer: issuer.into(),
        }
    }

    /// Generate a seed, persist it encrypted under a short-lived setup
    /// token, and return the QR payload.
    pub async fn start_setup(&self, user: &User) -> Result<SetupStart, ApiError> {
        if user.has_2fa_enabled {
            return Err(ApiError::Conflict(
                "two-factor auth is already enabled".to_owned(),
            ));
        }
        let seed = SeedCipher::generate_seed();
        let encrypted = self
            .cipher
            .encrypt_seed(&seed)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let setup_token = Uuid::new_v4();
        let expires_at = Utc::now() + Duration::minutes(SETUP_TTL_MINUTES);
        self.store
            .put_pending_twofa(user.id, &encrypted, setup_token, expires_at)
            .await?;

        info!(user_id = %user.id, "2fa setup started");
        Ok(SetupStart {
            setup_token,
            secret: seed.expose_secret().clone(),
            otpauth_uri: totp::provisioning_uri(seed.expose_secret(), &self.issuer, &user.email),
        })
    }

    /// Validate the setup token and the first code; on success generate
    /// backup codes (hashed at rest) and mark 2FA enabled. The plaintext
    /// codes are returned exactly once.
    pub async fn verify_setup(
        &self,
        user: &User,
        setup_token: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, ApiError> {
        let settings = self
            .store
            .get_twofa(user.id)
            .await?
            .ok_or_else(|| ApiError::NotFound("no pending 2fa setup".to_owned()))?;
        if settings.enabled {
            return Err(ApiError::Conflict(
                "two-factor auth is already enabled".to_owned(),
            ));
        }
        if settings.setup_token != Some(setup_token) {
            return Err(ApiError::BadRequest("invalid setup token".to_owned()));
        }
        if settings.setup_expires_at.is_none_or(|exp| exp <= now) {
            return Err(ApiError::BadRequest("setup token expired".to_owned()));
        }

        let seed = self
            .cipher
            .decrypt_seed(&settings.encrypted_seed)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        #[allow(clippy::cast_sign_loss)]
        if !totp::verify(seed.expose_secret(), code, now.timestamp() as u64, 1) {
            return Err(ApiError::BadRequest("invalid code".to_owned()));
        }

        let codes = generate_backup_codes();
        let hashes = codes
            .iter()
            .map(|code| hash_code(code))
            .collect::<Result<Vec<_>, _>>()?;
        self.store.enable_twofa(user.id, &hashes).await?;

        info!(user_id = %user.id, "2fa enabled");
        Ok(codes)
    }

    /// Verify a TOTP or backup code for login.
    ///
    /// Failures count toward the threshold; at three the account locks for
    /// an escalating window (5 min, 15 min, 1 h, 24 h).
    pub async fn verify(
        &self,
        user: &User,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let settings = self
            .store
            .get_twofa(user.id)
            .await?
            .filter(|s| s.enabled)
            .ok_or_else(|| ApiError::BadRequest("two-factor auth is not enabled".to_owned()))?;

        let mut attempts = self.store.get_twofa_attempts(user.id).await?;
        if let Some(until) = attempts.locked_until
            && until > now
        {
            return Err(ApiError::AccountLocked { until });
        }

        let seed = self
            .cipher
            .decrypt_seed(&settings.encrypted_seed)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        #[allow(clippy::cast_sign_loss)]
        if totp::verify(seed.expose_secret(), code, now.timestamp() as u64, 1) {
            self.store
                .put_twofa_attempts(user.id, &TwoFactorAttempts::default())
                .await?;
            return Ok(());
        }

        // A backup code is consumed on first use.
        for hash in &settings.backup_code_hashes {
            if verify_hash(hash, code) {
                self.store.remove_backup_code(user.id, hash).await?;
                self.store
                    .put_twofa_attempts(user.id, &TwoFactorAttempts::default())
                    .await?;
                info!(user_id = %user.id, "backup code consumed");
                return Ok(());
            }
        }

        attempts.failed_attempts += 1;
        if attempts.failed_attempts >= FAIL_THRESHOLD {
            let level = (attempts.lockout_level as usize).min(LOCKOUT_MINUTES.len() - 1);
            let until = now + Duration::minutes(LOCKOUT_MINUTES[level]);
            attempts.failed_attempts = 0;
            attempts.lockout_level = attempts.lockout_level.saturating_add(1);
            attempts.locked_until = Some(until);
            self.store.put_twofa_attempts(user.id, &attempts).await?;
            warn!(user_id = %user.id, %until, "2fa lockout");
            return Err(ApiError::AccountLocked { until });
        }
        self.store.put_twofa_attempts(user.id, &attempts).await?;
        Err(ApiError::BadRequest("invalid code".to_owned()))
    }

    /// Disable 2FA. Requires a currently valid TOTP code (a backup code is
    /// not accepted here).
    pub async fn disable(
        &self,
        user: &User,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let settings = self
            .store
            .get_twofa(user.id)
            .await?
            .filter(|s| s.enabled)
            .ok_or_else(|| ApiError::BadRequest("two-factor auth is not enabled".to_owned()))?;

        let seed = self
            .cipher
            .decrypt_seed(&settings.encrypted_seed)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        #[allow(clippy::cast_sign_loss)]
        if !totp::verify(seed.expose_secret(), code, now.timestamp() as u64, 1) {
            return Err(ApiError::BadRequest("invalid code".to_owned()));
        }

        self.store.disable_twofa(user.id).await?;
        info!(user_id = %user.id, "2fa disabled");
        Ok(())
    }

    /// Current 2FA state for the status endpoint.
    pub async fn status(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<TwoFactorStatus, ApiError> {
        let settings = self.store.get_twofa(user.id).await?;
        let attempts = self.store.get_twofa_attempts(user.id).await?;
        let locked_until = attempts.locked_until.filter(|until| *until > now);
        Ok(TwoFactorStatus {
            enabled: settings.as_ref().is_some_and(|s| s.enabled),
            pending_setup: settings
                .as_ref()
                .is_some_and(|s| !s.enabled && s.setup_token.is_some()),
            is_locked: locked_until.is_some(),
            locked_until,
            remaining_backup_codes: settings
                .as_ref()
                .filter(|s| s.enabled)
                .map_or(0, |s| s.backup_code_hashes.len()),
        })
    }
}

/// Ten hex chars per code, grouped for readability.
fn generate_backup_codes() -> Vec<String> {
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let mut raw = [0u8; 5];
            OsRng.fill_bytes(&mut raw);
            let hex = hex::encode(raw);
            format!("{}-{}", &hex[..5], &hex[5..])
        })
        .collect()
}

fn hash_code(code: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(code.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("backup code hashing failed: {e}")))
}

/// Verify a candidate against an argon2 hash string.
fn verify_hash(hash: &str, candidate: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use netpilot_crypto::parse_master_key;

    use crate::store::{MemoryUserStore, UserStore};

    use super::*;

    fn service() -> (Arc<MemoryUserStore>, TwoFactorService) {
        let store = Arc::new(MemoryUserStore::new());
        let cipher = SeedCipher::new(parse_master_key(&"42".repeat(32)).unwrap());
        let service = TwoFactorService::new(
            Arc::clone(&store) as Arc<dyn UserStore>,
            cipher,
            "NetPilot",
        );
        (store, service)
    }

    async fn enrolled_user(
        store: &Arc<MemoryUserStore>,
        service: &TwoFactorService,
    ) -> (User, String, Vec<String>) {
        let user = store
            .find_or_create_user("google-123", "a@example.com")
            .await
            .unwrap();
        let setup = service.start_setup(&user).await.unwrap();
        let now = Utc::now();
        #[allow(clippy::cast_sign_loss)]
        let code = totp::code_at(&setup.secret, now.timestamp() as u64 / totp::TIME_STEP).unwrap();
        let backup_codes = service
            .verify_setup(&user, setup.setup_token, &code, now)
            .await
            .unwrap();
        let user = store.get_user(user.id).await.unwrap().unwrap();
        (user, setup.secret, backup_codes)
    }

    fn code_now(secret: &str, now: DateTime<Utc>) -> String {
        #[allow(clippy::cast_sign_loss)]
        totp::code_at(secret, now.timestamp() as u64 / totp::TIME_STEP).unwrap()
    }

    #[tokio::test]
    async fn full_setup_flow_enables_2fa() {
        let (store, service) = service();
        let (user, _secret, backup_codes) = enrolled_user(&store, &service).await;
        assert!(user.has_2fa_enabled);
        assert_eq!(backup_codes.len(), BACKUP_CODE_COUNT);

        let status = service.status(&user, Utc::now()).await.unwrap();
        assert!(status.enabled);
        assert!(!status.is_locked);
        assert_eq!(status.remaining_backup_codes, BACKUP_CODE_COUNT);
    }

    #[tokio::test]
    async fn setup_token_expires() {
        let (store, service) = service();
        let user = store
            .find_or_create_user("google-123", "a@example.com")
            .await
            .unwrap();
        let setup = service.start_setup(&user).await.unwrap();
        let later = Utc::now() + Duration::minutes(SETUP_TTL_MINUTES + 1);
        let code = code_now(&setup.secret, later);
        let err = service
            .verify_setup(&user, setup.setup_token, &code, later)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn totp_verify_succeeds_and_resets_counters() {
        let (store, service) = service();
        let (user, secret, _) = enrolled_user(&store, &service).await;
        let now = Utc::now();

        // Two failures, then a success; the counter must reset.
        for _ in 0..2 {
            let err = service.verify(&user, "000000", now).await.unwrap_err();
            assert!(matches!(err, ApiError::BadRequest(_)));
        }
        service.verify(&user, &code_now(&secret, now), now).await.unwrap();

        // Two more failures do not lock (counter was reset).
        for _ in 0..2 {
            let _ = service.verify(&user, "000000", now).await;
        }
        service.verify(&user, &code_now(&secret, now), now).await.unwrap();
    }

    #[tokio::test]
    async fn third_failure_locks_with_escalation() {
        let (store, service) = service();
        let (user, secret, _) = enrolled_user(&store, &service).await;
        let now = Utc::now();

        for _ in 0..2 {
            let _ = service.verify(&user, "000000", now).await;
        }
        let err = service.verify(&user, "000000", now).await.unwrap_err();
        let ApiError::AccountLocked { until } = err else {
            panic!("expected lockout, got {err:?}");
        };
        assert!(until >= now + Duration::minutes(5));

        // While locked, even the right code is refused.
        let err = service
            .verify(&user, &code_now(&secret, now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AccountLocked { .. }));

        let status = service.status(&user, now).await.unwrap();
        assert!(status.is_locked);

        // After the window passes, three more failures escalate to 15 min.
        let after = until + Duration::seconds(1);
        for _ in 0..2 {
            let _ = service.verify(&user, "000000", after).await;
        }
        let err = service.verify(&user, "000000", after).await.unwrap_err();
        let ApiError::AccountLocked { until: second } = err else {
            panic!("expected second lockout, got {err:?}");
        };
        assert!(second >= after + Duration::minutes(15));
    }

    #[tokio::test]
    async fn backup_code_works_once() {
        let (store, service) = service();
        let (user, _secret, backup_codes) = enrolled_user(&store, &service).await;
        let now = Utc::now();
        let code = &backup_codes[0];

        service.verify(&user, code, now).await.unwrap();
        let status = service.status(&user, now).await.unwrap();
        assert_eq!(status.remaining_backup_codes, BACKUP_CODE_COUNT - 1);

        // The same code is spent.
        let err = service.verify(&user, code, now).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn disable_requires_valid_totp() {
        let (store, service) = service();
        let (user, secret, backup_codes) = enrolled_user(&store, &service).await;
        let now = Utc::now();

        // A backup code is not enough to disable.
        let err = service
            .disable(&user, &backup_codes[0], now)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        service
            .disable(&user, &code_now(&secret, now), now)
            .await
            .unwrap();
        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert!(!user.has_2fa_enabled);
        let status = service.status(&user, now).await.unwrap();
        assert!(!status.enabled);
    }

    #[tokio::test]
    async fn start_setup_twice_replaces_pending_seed() {
        let (store, service) = service();
        let user = store
            .find_or_create_user("google-123", "a@example.com")
            .await
            .unwrap();
        let first = service.start_setup(&user).await.unwrap();
        let second = service.start_setup(&user).await.unwrap();
        assert_ne!(first.secret, second.secret);

        // Only the latest token works.
        let now = Utc::now();
        let err = service
            .verify_setup(&user, first.setup_token, &code_now(&second.secret, now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
