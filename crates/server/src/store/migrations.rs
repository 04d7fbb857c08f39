use sqlx::PgPool;

/// Run database migrations, creating required tables if they do not exist.
///
/// All keys are UUIDs; the list tables carry the `(user_id, router_id, ip)`
/// uniqueness the orchestrated calls rely on.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            oauth_subject TEXT NOT NULL UNIQUE,
            requires_2fa BOOLEAN NOT NULL DEFAULT FALSE,
            has_2fa_enabled BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS user_sessions (
            session_id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES users(id),
            created_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            twofa_verified BOOLEAN NOT NULL DEFAULT FALSE,
            mirrored BOOLEAN NOT NULL DEFAULT FALSE
        )",
        "CREATE TABLE IF NOT EXISTS user_routers (
            user_id UUID NOT NULL REFERENCES users(id),
            router_id TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (user_id, router_id)
        )",
        "CREATE TABLE IF NOT EXISTS user_devices (
            user_id UUID NOT NULL REFERENCES users(id),
            router_id TEXT NOT NULL,
            ip TEXT NOT NULL,
            mac TEXT NOT NULL,
            hostname TEXT NOT NULL,
            first_seen TIMESTAMPTZ NOT NULL,
            last_seen TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (user_id, router_id, ip)
        )",
        "CREATE TABLE IF NOT EXISTS user_whitelists (
            user_id UUID NOT NULL REFERENCES users(id),
            router_id TEXT NOT NULL,
            ip TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (user_id, router_id, ip)
        )",
        "CREATE TABLE IF NOT EXISTS user_blacklists (
            user_id UUID NOT NULL REFERENCES users(id),
            router_id TEXT NOT NULL,
            ip TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (user_id, router_id, ip)
        )",
        "CREATE TABLE IF NOT EXISTS user_settings (
            user_id UUID NOT NULL REFERENCES users(id),
            router_id TEXT NOT NULL,
            whitelist_active BOOLEAN NOT NULL DEFAULT FALSE,
            blacklist_active BOOLEAN NOT NULL DEFAULT FALSE,
            whitelist_rate INTEGER,
            blacklist_rate INTEGER,
            PRIMARY KEY (user_id, router_id),
            CHECK (NOT (whitelist_active AND blacklist_active))
        )",
        "CREATE TABLE IF NOT EXISTS user_2fa_settings (
            user_id UUID PRIMARY KEY REFERENCES users(id),
            encrypted_seed TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT FALSE,
            backup_code_hashes JSONB NOT NULL DEFAULT '[]'::jsonb,
            setup_token UUID,
            setup_expires_at TIMESTAMPTZ
        )",
        "CREATE TABLE IF NOT EXISTS user_2fa_attempts (
            user_id UUID PRIMARY KEY REFERENCES users(id),
            failed_attempts INTEGER NOT NULL DEFAULT 0,
            lockout_level INTEGER NOT NULL DEFAULT 0,
            locked_until TIMESTAMPTZ
        )",
        "CREATE INDEX IF NOT EXISTS user_sessions_user_idx ON user_sessions (user_id)",
        "CREATE INDEX IF NOT EXISTS user_routers_active_idx ON user_routers (user_id) WHERE active",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
