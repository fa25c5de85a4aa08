pub mod crawl;
pub mod map;
pub mod player;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::state::{AppState, HealthResponse};
use crate::utils::json_error_response;

pub fn api_router(state: AppState) -> Router {
    let player = Router::new()
        .route("/player/toggle", post(player::toggle))
        .route("/player/next", post(player::next))
        .route("/player/random", post(player::random))
        .route("/player/stop", post(player::stop))
        .route("/player/ended", post(player::track_ended))
        .route("/player/failed", post(player::audio_failed));

    let map = Router::new()
        .route("/map", get(map::get_map))
        .route("/viewport", post(map::set_viewport))
        .route("/map/markers/click", post(map::marker_click))
        .route("/map/popup/open", post(map::open_popup))
        .route("/map/popup/close", post(map::close_popup))
        .route("/events", get(map::events));

    Router::new()
        .route("/health", get(health))
        .route("/session", get(crawl::get_session))
        .route("/crawl", post(crawl::start_crawl))
        .route("/crawl/from-current", post(crawl::crawl_from_current))
        .route("/releases", get(crawl::list_releases))
        .route("/tags", get(crawl::get_tags))
        .route("/filter", post(crawl::set_filter))
        .merge(player)
        .merge(map)
        .fallback(not_found)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn not_found() -> Response {
    json_error_response(StatusCode::NOT_FOUND, "not found")
}
