use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use netpilot_client::{ClientError, CommandsApi};
use netpilot_core::{CommandResponse, ErrorCode, RetryPolicy, SessionId, retry};

use crate::api::AppState;
use crate::error::ApiError;
use crate::store::UserSession;

/// Retry policy for session-mirroring announcements. Announcements are
/// idempotent, so bounded retry is safe; commands themselves never retry.
fn mirror_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        base_backoff: Duration::from_millis(200),
        max_backoff: Duration::from_secs(2),
    }
}

fn transport_error(err: &ClientError) -> ApiError {
    match err {
        ClientError::Api {
            code,
            message,
            retryable: _,
        } => ApiError::Downstream {
            code: *code,
            message: message.clone(),
        },
        other => ApiError::Internal(format!("commands server unreachable: {other}")),
    }
}

/// Make sure the Commands-Server knows this session before any command.
///
/// A session row persisted without a successful announcement keeps
/// `mirrored = false`; this re-announces (bounded retry) and records the
/// acknowledgement, upholding the binding invariant.
pub async fn ensure_mirrored(state: &AppState, session: &UserSession) -> Result<(), ApiError> {
    if session.mirrored {
        return Ok(());
    }
    let response = retry(mirror_policy(), ClientError::is_retryable, || {
        state.commands.start_session(session.session_id, false)
    })
    .await
    .map_err(|e| transport_error(&e))?;
    if !response.success {
        let (code, message) = split_failure(&response);
        return Err(ApiError::Downstream { code, message });
    }
    state
        .store
        .set_session_mirrored(session.session_id, true)
        .await?;
    Ok(())
}

fn split_failure(response: &CommandResponse) -> (ErrorCode, String) {
    response.error.as_ref().map_or(
        (ErrorCode::Internal, "unspecified failure".to_owned()),
        |e| (e.code, e.message.clone()),
    )
}

/// The dispatch pattern shared by every router action.
///
/// Ensures the session is mirrored, invokes the Commands-Server call, and
/// returns the envelope's `data` on success. On `success = false` nothing
/// is persisted by the caller; the downstream code is passed through with
/// a correlation id in the logs.
pub async fn dispatch<F, Fut>(
    state: &AppState,
    session: &UserSession,
    operation: &'static str,
    call: F,
) -> Result<serde_json::Value, ApiError>
where
    F: FnOnce(Arc<dyn CommandsApi>, SessionId) -> Fut,
    Fut: Future<Output = Result<CommandResponse, ClientError>>,
{
    ensure_mirrored(state, session).await?;

    let correlation_id = Uuid::new_v4();
    let response = call(Arc::clone(&state.commands), session.session_id)
        .await
        .map_err(|e| {
            warn!(%correlation_id, operation, error = %e, "commands call failed in transport");
            transport_error(&e)
        })?;

    if response.success {
        info!(
            %correlation_id,
            operation,
            duration_ms = response.metadata.duration_ms,
            "command succeeded"
        );
        Ok(response.data.unwrap_or(serde_json::Value::Null))
    } else {
        let (code, message) = split_failure(&response);
        warn!(
            %correlation_id,
            operation,
            %code,
            message,
            duration_ms = response.metadata.duration_ms,
            "command failed downstream"
        );
        Err(ApiError::Downstream { code, message })
    }
}
