use axum::Json;
use axum::extract::State;

use crate::auth::RouterScope;
use crate::dispatch::dispatch;
use crate::error::ApiError;

use super::AppState;
use super::schemas::ok;

/// `POST /api/session/start?routerId=` -- announce the session to the
/// Commands-Server and record the acknowledgement.
pub async fn start(
    State(state): State<AppState>,
    scope: RouterScope,
) -> Result<Json<serde_json::Value>, ApiError> {
    // `dispatch` itself performs the announcement when unmirrored; calling
    // start explicitly is idempotent either way.
    let data = dispatch(&state, &scope.session, "session_start", |api, sid| async move {
        api.start_session(sid, false).await
    })
    .await?;
    state
        .store
        .set_session_mirrored(scope.session.session_id, true)
        .await?;
    Ok(ok(data))
}

/// `POST /api/session/end?routerId=` -- tear down the Commands-Server
/// session and its pooled connections.
pub async fn end(
    State(state): State<AppState>,
    scope: RouterScope,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = scope.session.session_id;
    let response = state
        .commands
        .end_session(session_id)
        .await
        .map_err(|e| ApiError::Internal(format!("commands server unreachable: {e}")))?;
    if !response.success {
        let (code, message) = response.error.map_or(
            (netpilot_core::ErrorCode::Internal, String::new()),
            |e| (e.code, e.message),
        );
        return Err(ApiError::Downstream { code, message });
    }
    state.store.set_session_mirrored(session_id, false).await?;
    Ok(ok(serde_json::json!({ "ended": true })))
}

/// `POST /api/session/refresh?routerId=` -- reset the idle TTL.
pub async fn refresh(
    State(state): State<AppState>,
    scope: RouterScope,
) -> Result<Json<serde_json::Value>, ApiError> {
    let data = dispatch(&state, &scope.session, "session_refresh", |api, sid| async move {
        api.refresh_session(sid).await
    })
    .await?;
    Ok(ok(data))
}
