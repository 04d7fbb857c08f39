use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use netpilot_core::{Device, ListKind, RouterId, SessionId};

use super::{
    DeviceRecord, ListEntry, ModeState, StoreError, TwoFactorAttempts, TwoFactorSettings, User,
    UserSession, UserStore, migrations,
};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn list_table(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Whitelist => "user_whitelists",
        ListKind::Blacklist => "user_blacklists",
    }
}

type UserRow = (Uuid, String, String, bool, bool, DateTime<Utc>);
type SessionRow = (Uuid, Uuid, DateTime<Utc>, DateTime<Utc>, bool, bool);

fn user_from_row(row: UserRow) -> User {
    User {
        id: row.0,
        email: row.1,
        oauth_subject: row.2,
        requires_2fa: row.3,
        has_2fa_enabled: row.4,
        created_at: row.5,
    }
}

fn session_from_row(row: SessionRow) -> UserSession {
    UserSession {
        session_id: SessionId::from_uuid(row.0),
        user_id: row.1,
        created_at: row.2,
        expires_at: row.3,
        twofa_verified: row.4,
        mirrored: row.5,
    }
}

/// PostgreSQL-backed [`UserStore`].
///
/// Uses `sqlx::PgPool` for connection pooling. Composite mutating
/// operations run inside a single transaction so a downstream crash never
/// leaves half-applied rows.
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    /// Connect, build the pool, and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the pool cannot be created or
    /// migrations fail.
    pub async fn new(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(database_url)
            .await
            .map_err(backend)?;
        migrations::run_migrations(&pool).await.map_err(backend)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared pools). Runs migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool).await.map_err(backend)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn find_or_create_user(&self, subject: &str, email: &str) -> Result<User, StoreError> {
        let row: UserRow = sqlx::query_as(
            "INSERT INTO users (id, email, oauth_subject, requires_2fa, has_2fa_enabled, created_at) \
             VALUES ($1, $2, $3, FALSE, FALSE, $4) \
             ON CONFLICT (oauth_subject) DO UPDATE SET email = EXCLUDED.email \
             RETURNING id, email, oauth_subject, requires_2fa, has_2fa_enabled, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(subject)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(user_from_row(row))
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, oauth_subject, requires_2fa, has_2fa_enabled, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(user_from_row))
    }

    async fn set_user_2fa_enabled(&self, user_id: Uuid, enabled: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET has_2fa_enabled = $2 WHERE id = $1")
            .bind(user_id)
            .bind(enabled)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn create_session(&self, session: &UserSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_sessions \
             (session_id, user_id, created_at, expires_at, twofa_verified, mirrored) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(session.session_id.as_uuid())
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.twofa_verified)
        .bind(session.mirrored)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("session {} already exists", session.session_id))
            }
            other => backend(other),
        })?;
        Ok(())
    }

    async fn get_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<UserSession>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, user_id, created_at, expires_at, twofa_verified, mirrored \
             FROM user_sessions WHERE session_id = $1",
        )
        .bind(session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(session_from_row))
    }

    async fn mark_session_verified(&self, session_id: SessionId) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE user_sessions SET twofa_verified = TRUE WHERE session_id = $1")
                .bind(session_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    async fn set_session_mirrored(
        &self,
        session_id: SessionId,
        mirrored: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE user_sessions SET mirrored = $2 WHERE session_id = $1")
            .bind(session_id.as_uuid())
            .bind(mirrored)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM user_sessions WHERE session_id = $1")
            .bind(session_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn active_router(&self, user_id: Uuid) -> Result<Option<RouterId>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT router_id FROM user_routers WHERE user_id = $1 AND active LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|(raw,)| {
            RouterId::parse(&raw).map_err(|e| StoreError::Backend(format!("corrupt router id: {e}")))
        })
        .transpose()
    }

    async fn is_owner(&self, user_id: Uuid, router_id: &RouterId) -> Result<bool, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT active FROM user_routers WHERE user_id = $1 AND router_id = $2",
        )
        .bind(user_id)
        .bind(router_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.is_some_and(|(active,)| active))
    }

    async fn bind_router(&self, user_id: Uuid, router_id: &RouterId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("UPDATE user_routers SET active = FALSE WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query(
            "INSERT INTO user_routers (user_id, router_id, active, created_at) \
             VALUES ($1, $2, TRUE, $3) \
             ON CONFLICT (user_id, router_id) DO UPDATE SET active = TRUE",
        )
        .bind(user_id)
        .bind(router_id.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    async fn upsert_devices(
        &self,
        user_id: Uuid,
        router_id: &RouterId,
        devices: &[Device],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let now = Utc::now();
        for device in devices {
            sqlx::query(
                "INSERT INTO user_devices (user_id, router_id, ip, mac, hostname, first_seen, last_seen) \
                 VALUES ($1, $2, $3, $4, $5, $6, $6) \
                 ON CONFLICT (user_id, router_id, ip) \
                 DO UPDATE SET mac = EXCLUDED.mac, hostname = EXCLUDED.hostname, last_seen = EXCLUDED.last_seen",
            )
            .bind(user_id)
            .bind(router_id.as_str())
            .bind(&device.ip)
            .bind(&device.mac)
            .bind(&device.hostname)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn list_devices(
        &self,
        user_id: Uuid,
        router_id: &RouterId,
    ) -> Result<Vec<DeviceRecord>, StoreError> {
        let rows: Vec<(String, String, String, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT ip, mac, hostname, first_seen, last_seen FROM user_devices \
             WHERE user_id = $1 AND router_id = $2 ORDER BY ip",
        )
        .bind(user_id)
        .bind(router_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|(ip, mac, hostname, first_seen, last_seen)| DeviceRecord {
                user_id,
                router_id: router_id.clone(),
                ip,
                mac,
                hostname,
                first_seen,
                last_seen,
            })
            .collect())
    }

    async fn list_contains(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<bool, StoreError> {
        let table = list_table(kind);
        let query = format!(
            "SELECT 1 FROM {table} WHERE user_id = $1 AND router_id = $2 AND ip = $3"
        );
        let row: Option<(i32,)> = sqlx::query_as(&query)
            .bind(user_id)
            .bind(router_id.as_str())
            .bind(ip)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.is_some())
    }

    async fn add_list_entry(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<(), StoreError> {
        let table = list_table(kind);
        let query = format!(
            "INSERT INTO {table} (user_id, router_id, ip, created_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (user_id, router_id, ip) DO NOTHING"
        );
        let result = sqlx::query(&query)
            .bind(user_id)
            .bind(router_id.as_str())
            .bind(ip)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("{ip} already in {kind}")));
        }
        Ok(())
    }

    async fn remove_list_entry(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        ip: &str,
    ) -> Result<(), StoreError> {
        let table = list_table(kind);
        let query =
            format!("DELETE FROM {table} WHERE user_id = $1 AND router_id = $2 AND ip = $3");
        let result = sqlx::query(&query)
            .bind(user_id)
            .bind(router_id.as_str())
            .bind(ip)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{ip} not in {kind}")));
        }
        Ok(())
    }

    async fn list_entries(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
    ) -> Result<Vec<ListEntry>, StoreError> {
        let table = list_table(kind);
        let query = format!(
            "SELECT ip, created_at FROM {table} \
             WHERE user_id = $1 AND router_id = $2 ORDER BY ip"
        );
        let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(&query)
            .bind(user_id)
            .bind(router_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|(ip, created_at)| ListEntry {
                user_id,
                router_id: router_id.clone(),
                ip,
                created_at,
            })
            .collect())
    }

    async fn mode_state(
        &self,
        user_id: Uuid,
        router_id: &RouterId,
    ) -> Result<ModeState, StoreError> {
        let row: Option<(bool, bool, Option<i32>, Option<i32>)> = sqlx::query_as(
            "SELECT whitelist_active, blacklist_active, whitelist_rate, blacklist_rate \
             FROM user_settings WHERE user_id = $1 AND router_id = $2",
        )
        .bind(user_id)
        .bind(router_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map_or_else(ModeState::default, |(wl, bl, wl_rate, bl_rate)| ModeState {
            whitelist_active: wl,
            blacklist_active: bl,
            whitelist_rate: wl_rate.and_then(|r| u16::try_from(r).ok()),
            blacklist_rate: bl_rate.and_then(|r| u16::try_from(r).ok()),
        }))
    }

    async fn set_mode_active(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        active: bool,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(
            "INSERT INTO user_settings (user_id, router_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, router_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(router_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let (own_column, other_column) = match kind {
            ListKind::Whitelist => ("whitelist_active", "blacklist_active"),
            ListKind::Blacklist => ("blacklist_active", "whitelist_active"),
        };
        // Activation is guarded in SQL: the row only updates while the other
        // mode is off, so both-active can never be committed.
        let query = if active {
            format!(
                "UPDATE user_settings SET {own_column} = TRUE \
                 WHERE user_id = $1 AND router_id = $2 AND NOT {other_column}"
            )
        } else {
            format!(
                "UPDATE user_settings SET {own_column} = FALSE \
                 WHERE user_id = $1 AND router_id = $2"
            )
        };
        let result = sqlx::query(&query)
            .bind(user_id)
            .bind(router_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if active && result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "{} mode is already active",
                kind.other()
            )));
        }
        tx.commit().await.map_err(backend)
    }

    async fn set_rate(
        &self,
        kind: ListKind,
        user_id: Uuid,
        router_id: &RouterId,
        rate: u16,
    ) -> Result<(), StoreError> {
        let column = match kind {
            ListKind::Whitelist => "whitelist_rate",
            ListKind::Blacklist => "blacklist_rate",
        };
        let query = format!(
            "INSERT INTO user_settings (user_id, router_id, {column}) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, router_id) DO UPDATE SET {column} = EXCLUDED.{column}"
        );
        sqlx::query(&query)
            .bind(user_id)
            .bind(router_id.as_str())
            .bind(i32::from(rate))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get_twofa(&self, user_id: Uuid) -> Result<Option<TwoFactorSettings>, StoreError> {
        let row: Option<(
            String,
            bool,
            serde_json::Value,
            Option<Uuid>,
            Option<DateTime<Utc>>,
        )> = sqlx::query_as(
            "SELECT encrypted_seed, enabled, backup_code_hashes, setup_token, setup_expires_at \
             FROM user_2fa_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|(encrypted_seed, enabled, hashes, setup_token, setup_expires_at)| {
            let backup_code_hashes: Vec<String> = serde_json::from_value(hashes)
                .map_err(|e| StoreError::Backend(format!("corrupt backup codes: {e}")))?;
            Ok(TwoFactorSettings {
                user_id,
                encrypted_seed,
                enabled,
                backup_code_hashes,
                setup_token,
                setup_expires_at,
            })
        })
        .transpose()
    }

    async fn put_pending_twofa(
        &self,
        user_id: Uuid,
        encrypted_seed: &str,
        setup_token: Uuid,
        setup_expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO user_2fa_settings \
             (user_id, encrypted_seed, enabled, backup_code_hashes, setup_token, setup_expires_at) \
             VALUES ($1, $2, FALSE, '[]'::jsonb, $3, $4) \
             ON CONFLICT (user_id) DO UPDATE \
             SET encrypted_seed = EXCLUDED.encrypted_seed, \
                 setup_token = EXCLUDED.setup_token, \
                 setup_expires_at = EXCLUDED.setup_expires_at \
             WHERE user_2fa_settings.enabled = FALSE",
        )
        .bind(user_id)
        .bind(encrypted_seed)
        .bind(setup_token)
        .bind(setup_expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(
                "two-factor auth is already enabled".to_owned(),
            ));
        }
        Ok(())
    }

    async fn enable_twofa(
        &self,
        user_id: Uuid,
        backup_code_hashes: &[String],
    ) -> Result<(), StoreError> {
        let hashes = serde_json::to_value(backup_code_hashes)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let result = sqlx::query(
            "UPDATE user_2fa_settings \
             SET enabled = TRUE, backup_code_hashes = $2, setup_token = NULL, setup_expires_at = NULL \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(hashes)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "no pending setup for {user_id}"
            )));
        }
        sqlx::query("UPDATE users SET has_2fa_enabled = TRUE, requires_2fa = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    async fn disable_twofa(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM user_2fa_settings WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM user_2fa_attempts WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("UPDATE users SET has_2fa_enabled = FALSE, requires_2fa = FALSE WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    async fn remove_backup_code(&self, user_id: Uuid, hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE user_2fa_settings SET backup_code_hashes = backup_code_hashes - $2 \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_twofa_attempts(
        &self,
        user_id: Uuid,
    ) -> Result<TwoFactorAttempts, StoreError> {
        let row: Option<(i32, i32, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT failed_attempts, lockout_level, locked_until \
             FROM user_2fa_attempts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map_or_else(
            TwoFactorAttempts::default,
            |(failed, level, locked_until)| TwoFactorAttempts {
                failed_attempts: u32::try_from(failed).unwrap_or(0),
                lockout_level: u32::try_from(level).unwrap_or(0),
                locked_until,
            },
        ))
    }

    async fn put_twofa_attempts(
        &self,
        user_id: Uuid,
        attempts: &TwoFactorAttempts,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_2fa_attempts (user_id, failed_attempts, lockout_level, locked_until) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id) DO UPDATE \
             SET failed_attempts = EXCLUDED.failed_attempts, \
                 lockout_level = EXCLUDED.lockout_level, \
                 locked_until = EXCLUDED.locked_until",
        )
        .bind(user_id)
        .bind(i32::try_from(attempts.failed_attempts).unwrap_or(i32::MAX))
        .bind(i32::try_from(attempts.lockout_level).unwrap_or(i32::MAX))
        .bind(attempts.locked_until)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}
