use axum::Json;
use axum::extract::{Query, State};
use axum::response::Redirect;
use axum_extra::extract::SignedCookieJar;
use axum_extra::extract::cookie::Cookie;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use netpilot_core::SessionId;

use crate::auth::session::{OAUTH_STATE_COOKIE, SESSION_COOKIE, session_cookie};
use crate::auth::PendingSession;
use crate::dispatch::ensure_mirrored;
use crate::error::ApiError;
use crate::store::UserSession;

use super::AppState;
use super::schemas::ok;

/// `GET /login` -- redirect the browser to the OAuth provider.
pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> (SignedCookieJar, Redirect) {
    let nonce = Uuid::new_v4().to_string();
    let url = state.oauth.authorize_url(&nonce);
    let jar = jar.add(
        Cookie::build((OAUTH_STATE_COOKIE, nonce))
            .path("/")
            .http_only(true)
            .build(),
    );
    (jar, Redirect::temporary(&url))
}

/// Query parameters on the provider's redirect back.
#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    code: String,
    state: String,
}

/// `GET /authorize` -- consume the OAuth code, find-or-create the user,
/// issue the session.
///
/// Users with 2FA enabled get an unverified session and a redirect flag;
/// everyone else is verified immediately and the session is announced to
/// the Commands-Server before the browser sees a cookie. A failed
/// announcement fails the login closed.
pub async fn authorize(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(query): Query<AuthorizeQuery>,
) -> Result<(SignedCookieJar, Redirect), ApiError> {
    let expected = jar
        .get(OAUTH_STATE_COOKIE)
        .map(|c| c.value().to_owned())
        .ok_or(ApiError::Unauthenticated)?;
    if expected != query.state {
        return Err(ApiError::Unauthenticated);
    }

    let identity = state.oauth.exchange_code(&query.code).await?;
    let user = state
        .store
        .find_or_create_user(&identity.subject, &identity.email)
        .await?;

    let needs_twofa = user.requires_2fa && user.has_2fa_enabled;
    let session = UserSession {
        session_id: SessionId::new(),
        user_id: user.id,
        created_at: Utc::now(),
        expires_at: Utc::now() + state.session_ttl,
        twofa_verified: !needs_twofa,
        mirrored: false,
    };
    state.store.create_session(&session).await?;

    if !needs_twofa {
        // Fail closed: a session the Commands-Server never acknowledged is
        // discarded rather than handed to the browser.
        if let Err(err) = ensure_mirrored(&state, &session).await {
            state.store.delete_session(session.session_id).await?;
            warn!(user_id = %user.id, error = %err, "login failed closed: session mirror rejected");
            return Err(err);
        }
    }

    info!(user_id = %user.id, session_id = %session.session_id, needs_twofa, "login");
    let jar = jar
        .remove(Cookie::from(OAUTH_STATE_COOKIE))
        .add(session_cookie(session.session_id));
    let target = if needs_twofa { "/?twofa=required" } else { "/" };
    Ok((jar, Redirect::temporary(target)))
}

/// `POST /logout` -- drop the session on both sides.
pub async fn logout(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    pending: PendingSession,
) -> Result<(SignedCookieJar, Json<serde_json::Value>), ApiError> {
    let session_id = pending.session.session_id;
    state.store.delete_session(session_id).await?;
    // Best effort: the Commands-Server reaps idle sessions anyway.
    if let Err(err) = state.commands.end_session(session_id).await {
        warn!(%session_id, error = %err, "commands session teardown failed during logout");
    }
    info!(%session_id, "logout");
    Ok((jar.remove(Cookie::from(SESSION_COOKIE)), ok(serde_json::json!({"loggedOut": true}))))
}

/// `GET /me` -- identity and verification state of the current session.
pub async fn me(
    State(_state): State<AppState>,
    pending: PendingSession,
) -> Json<serde_json::Value> {
    ok(serde_json::json!({
        "userId": pending.user.id,
        "email": pending.user.email,
        "has2faEnabled": pending.user.has_2fa_enabled,
        "twofaVerified": pending.session.twofa_verified,
    }))
}

/// `POST /api/2fa/verify` helper: promote the session after a verified
/// code and announce it, failing closed on mirror failure.
pub async fn promote_session(
    state: &AppState,
    session: &UserSession,
) -> Result<(), ApiError> {
    state
        .store
        .mark_session_verified(session.session_id)
        .await?;
    let mut verified = session.clone();
    verified.twofa_verified = true;
    if let Err(err) = ensure_mirrored(state, &verified).await {
        state.store.delete_session(session.session_id).await?;
        warn!(session_id = %session.session_id, error = %err, "2fa login failed closed: session mirror rejected");
        return Err(err);
    }
    Ok(())
}
