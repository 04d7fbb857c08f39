use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{CurrentSession, PendingSession};
use crate::error::ApiError;

use super::AppState;
use super::auth::promote_session;
use super::schemas::ok;

/// `POST /api/2fa/setup/start` -- generate a seed and QR payload.
pub async fn setup_start(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<Json<serde_json::Value>, ApiError> {
    let setup = state.twofactor.start_setup(&current.user).await?;
    Ok(ok(setup))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupVerifyRequest {
    setup_token: Uuid,
    code: String,
}

/// `POST /api/2fa/setup/verify` -- confirm the first code; returns the
/// backup codes exactly once.
pub async fn setup_verify(
    State(state): State<AppState>,
    current: CurrentSession,
    Json(request): Json<SetupVerifyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let backup_codes = state
        .twofactor
        .verify_setup(&current.user, request.setup_token, &request.code, Utc::now())
        .await?;
    Ok(ok(serde_json::json!({ "backupCodes": backup_codes })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    code: String,
}

/// `POST /api/2fa/verify` -- verify a TOTP or backup code for login.
///
/// On success the session is marked verified and announced to the
/// Commands-Server; a failed announcement discards the session (fail
/// closed).
pub async fn verify(
    State(state): State<AppState>,
    pending: PendingSession,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .twofactor
        .verify(&pending.user, &request.code, Utc::now())
        .await?;
    promote_session(&state, &pending.session).await?;
    Ok(ok(serde_json::json!({ "verified": true })))
}

/// `POST /api/2fa/disable` -- requires a currently valid TOTP code.
pub async fn disable(
    State(state): State<AppState>,
    current: CurrentSession,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .twofactor
        .disable(&current.user, &request.code, Utc::now())
        .await?;
    Ok(ok(serde_json::json!({ "disabled": true })))
}

/// `GET /api/2fa/status`.
pub async fn status(
    State(state): State<AppState>,
    pending: PendingSession,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state.twofactor.status(&pending.user, Utc::now()).await?;
    Ok(ok(status))
}
