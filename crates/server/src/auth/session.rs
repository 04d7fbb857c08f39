use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::SignedCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Utc;

use netpilot_core::SessionId;

use crate::api::AppState;
use crate::error::ApiError;
use crate::store::{User, UserSession};

/// Name of the signed session cookie.
pub const SESSION_COOKIE: &str = "netpilot_session";

/// Name of the signed OAuth CSRF-state cookie.
pub const OAUTH_STATE_COOKIE: &str = "netpilot_oauth_state";

/// Build the session cookie for a freshly issued session.
#[must_use]
pub fn session_cookie(session_id: SessionId) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// A session that passed OAuth but not necessarily 2FA.
///
/// Only the 2FA endpoints and `GET /me` accept this; everything else goes
/// through [`CurrentSession`].
pub struct PendingSession {
    pub session: UserSession,
    pub user: User,
}

/// A fully verified session. Business endpoints extract this.
pub struct CurrentSession {
    pub session: UserSession,
    pub user: User,
}

async fn load_session(parts: &mut Parts, state: &AppState) -> Result<PendingSession, ApiError> {
    let jar: SignedCookieJar = SignedCookieJar::from_request_parts(parts, state)
        .await
        .map_err(|_| ApiError::Unauthenticated)?;
    let raw = jar
        .get(SESSION_COOKIE)
        .ok_or(ApiError::Unauthenticated)?
        .value()
        .to_owned();
    let session_id: SessionId = raw.parse().map_err(|_| ApiError::Unauthenticated)?;

    let session = state
        .store
        .get_session(session_id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
    if session.is_expired(Utc::now()) {
        state.store.delete_session(session_id).await?;
        return Err(ApiError::Unauthenticated);
    }

    let user = state
        .store
        .get_user(session.user_id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    Ok(PendingSession { session, user })
}

impl FromRequestParts<AppState> for PendingSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        load_session(parts, state).await
    }
}

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let pending = load_session(parts, state).await?;
        // 2FA-gated users with an unverified session are refused here.
        if !pending.session.twofa_verified {
            return Err(ApiError::AuthIncomplete);
        }
        Ok(Self {
            session: pending.session,
            user: pending.user,
        })
    }
}
