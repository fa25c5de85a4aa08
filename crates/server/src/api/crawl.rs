use atlas::GenreTags;
use axum::{extract::State, http::StatusCode, Json};
use common::ReleaseRecord;
use tracing::info;

use crate::explorer::SessionSnapshot;
use crate::state::{AppState, CrawlRequest, FilterRequest, JsonResult, ListResponse};
use crate::utils::{json_error, normalize_source_url, session_error};

pub async fn get_session(State(state): State<AppState>) -> JsonResult<SessionSnapshot> {
    let snapshot = state.session.snapshot().await.map_err(session_error)?;
    Ok(Json(snapshot))
}

pub async fn start_crawl(
    State(state): State<AppState>,
    Json(payload): Json<CrawlRequest>,
) -> JsonResult<SessionSnapshot> {
    let raw = match payload.url {
        Some(url) if !url.trim().is_empty() => url,
        _ => state.config.read().default_source_url.clone(),
    };
    let url = normalize_source_url(&raw)
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "url must be an http(s) release page"))?;
    info!("Crawl requested for {}", url);
    let snapshot = state.session.start_crawl(url).await.map_err(session_error)?;
    Ok(Json(snapshot))
}

pub async fn crawl_from_current(State(state): State<AppState>) -> JsonResult<SessionSnapshot> {
    match state.session.crawl_from_current().await.map_err(session_error)? {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Err(json_error(StatusCode::CONFLICT, "nothing is playing")),
    }
}

pub async fn list_releases(State(state): State<AppState>) -> JsonResult<ListResponse<ReleaseRecord>> {
    let items = state.session.releases().await.map_err(session_error)?;
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

pub async fn get_tags(State(state): State<AppState>) -> JsonResult<GenreTags> {
    let tags = state.session.tags().await.map_err(session_error)?;
    Ok(Json(tags))
}

pub async fn set_filter(
    State(state): State<AppState>,
    Json(payload): Json<FilterRequest>,
) -> JsonResult<SessionSnapshot> {
    let snapshot = state
        .session
        .set_genres(payload.genres)
        .await
        .map_err(session_error)?;
    Ok(Json(snapshot))
}
