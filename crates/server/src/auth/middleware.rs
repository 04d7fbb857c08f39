use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Deserialize;

use netpilot_core::RouterId;

use crate::api::AppState;
use crate::auth::session::CurrentSession;
use crate::error::ApiError;
use crate::store::{User, UserSession};

#[derive(Debug, Deserialize)]
struct RouterQuery {
    #[serde(rename = "routerId")]
    router_id: Option<String>,
}

/// Authorisation context for router-scoped endpoints.
///
/// Extraction enforces the full chain: valid verified session, `routerId`
/// query parameter present and well-formed, and an active `(user, router)`
/// ownership row. A request failing any step never reaches the handler, so
/// no downstream call can be made for it.
pub struct RouterScope {
    pub user: User,
    pub session: UserSession,
    pub router_id: RouterId,
}

impl FromRequestParts<AppState> for RouterScope {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let current = CurrentSession::from_request_parts(parts, state).await?;

        let query: RouterQuery = serde_urlencoded::from_str(parts.uri.query().unwrap_or(""))
            .map_err(|e| ApiError::BadRequest(format!("bad query string: {e}")))?;
        let raw = query
            .router_id
            .ok_or_else(|| ApiError::BadRequest("routerId query parameter is required".to_owned()))?;
        let router_id = RouterId::parse(&raw)
            .map_err(|_| ApiError::BadRequest(format!("malformed routerId: {raw:?}")))?;

        if !state.store.is_owner(current.user.id, &router_id).await? {
            return Err(ApiError::Forbidden(format!(
                "router {router_id} is not bound to this account"
            )));
        }

        Ok(Self {
            user: current.user,
            session: current.session,
            router_id,
        })
    }
}
