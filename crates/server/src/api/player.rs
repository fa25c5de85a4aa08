use axum::{extract::State, Json};

use crate::explorer::SessionSnapshot;
use crate::state::{AppState, JsonResult, KeyRequest, TokenRequest};
use crate::utils::{require_key, session_error};

pub async fn toggle(
    State(state): State<AppState>,
    Json(payload): Json<KeyRequest>,
) -> JsonResult<SessionSnapshot> {
    require_key(&payload.key)?;
    let snapshot = state
        .session
        .toggle(payload.key)
        .await
        .map_err(session_error)?;
    Ok(Json(snapshot))
}

pub async fn next(State(state): State<AppState>) -> JsonResult<SessionSnapshot> {
    let snapshot = state.session.next().await.map_err(session_error)?;
    Ok(Json(snapshot))
}

pub async fn random(State(state): State<AppState>) -> JsonResult<SessionSnapshot> {
    let snapshot = state.session.random().await.map_err(session_error)?;
    Ok(Json(snapshot))
}

pub async fn stop(State(state): State<AppState>) -> JsonResult<SessionSnapshot> {
    let snapshot = state.session.stop().await.map_err(session_error)?;
    Ok(Json(snapshot))
}

/// The browser's audio element reached the end of stream `token`.
pub async fn track_ended(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> JsonResult<SessionSnapshot> {
    let snapshot = state
        .session
        .track_ended(payload.token)
        .await
        .map_err(session_error)?;
    Ok(Json(snapshot))
}

pub async fn audio_failed(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> JsonResult<SessionSnapshot> {
    let snapshot = state
        .session
        .audio_failed(payload.token)
        .await
        .map_err(session_error)?;
    Ok(Json(snapshot))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use parking_lot::RwLock;

    use super::*;
    use crate::config::ServerConfig;
    use crate::events::EventBroadcaster;
    use crate::session::SessionHandle;

    pub(crate) fn closed_state() -> AppState {
        AppState {
            config: Arc::new(RwLock::new(ServerConfig::default())),
            session: SessionHandle::closed(),
            events: EventBroadcaster::new(4),
        }
    }

    pub(crate) fn status_of<T>(result: JsonResult<T>) -> StatusCode {
        match result {
            Ok(_) => StatusCode::OK,
            Err((status, _)) => status,
        }
    }

    fn key(value: &str) -> Json<KeyRequest> {
        Json(KeyRequest {
            key: value.to_string(),
        })
    }

    #[tokio::test]
    async fn toggle_requires_a_key() {
        assert_eq!(
            status_of(toggle(State(closed_state()), key("  ")).await),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(toggle(State(closed_state()), key("a")).await),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
