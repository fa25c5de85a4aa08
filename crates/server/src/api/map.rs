use std::convert::Infallible;
use std::time::Duration;

use atlas::Bounds;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::Stream;
use tracing::debug;

use crate::explorer::SessionSnapshot;
use crate::markers::{RenderPass, Viewport};
use crate::state::{AppState, JsonResult, KeyRequest, PopupResponse, ViewportRequest};
use crate::utils::{json_error, require_key, session_error};

pub async fn get_map(State(state): State<AppState>) -> JsonResult<RenderPass> {
    let pass = state.session.map().await.map_err(session_error)?;
    Ok(Json(pass))
}

pub async fn set_viewport(
    State(state): State<AppState>,
    Json(payload): Json<ViewportRequest>,
) -> JsonResult<RenderPass> {
    if !payload.zoom.is_finite() || payload.zoom < 0.0 {
        return Err(json_error(StatusCode::BAD_REQUEST, "invalid zoom"));
    }
    let bounds = payload.bounds.unwrap_or(Bounds::WORLD);
    if ![bounds.west, bounds.south, bounds.east, bounds.north]
        .iter()
        .all(|value| value.is_finite())
        || bounds.south > bounds.north
    {
        return Err(json_error(StatusCode::BAD_REQUEST, "invalid bounds"));
    }
    let viewport = Viewport {
        zoom: payload.zoom,
        bounds,
    };
    let pass = state
        .session
        .set_viewport(viewport)
        .await
        .map_err(session_error)?;
    Ok(Json(pass))
}

/// A marker was clicked on the map; this toggles its release.
pub async fn marker_click(
    State(state): State<AppState>,
    Json(payload): Json<KeyRequest>,
) -> JsonResult<SessionSnapshot> {
    require_key(&payload.key)?;
    let snapshot = state
        .session
        .marker_click(payload.key)
        .await
        .map_err(session_error)?;
    Ok(Json(snapshot))
}

pub async fn open_popup(
    State(state): State<AppState>,
    Json(payload): Json<KeyRequest>,
) -> JsonResult<PopupResponse> {
    let open = state
        .session
        .open_popup(payload.key.clone())
        .await
        .map_err(session_error)?;
    if !open {
        return Err(json_error(StatusCode::NOT_FOUND, "no marker for key"));
    }
    Ok(Json(PopupResponse {
        key: payload.key,
        open,
    }))
}

pub async fn close_popup(
    State(state): State<AppState>,
    Json(payload): Json<KeyRequest>,
) -> JsonResult<PopupResponse> {
    state
        .session
        .close_popup(payload.key.clone())
        .await
        .map_err(session_error)?;
    Ok(Json(PopupResponse {
        key: payload.key,
        open: false,
    }))
}

pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Event client connected ({} listening)", state.events.client_count() + 1);
    Sse::new(state.events.subscribe_stream()).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
