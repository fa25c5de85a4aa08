use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::Url;

use crate::session::SessionError;
use crate::state::ErrorResponse;

pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn json_error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_error(status, message).into_response()
}

pub fn session_error(err: SessionError) -> (StatusCode, Json<ErrorResponse>) {
    json_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
}

pub fn require_key(key: &str) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if key.trim().is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "key is required"));
    }
    Ok(())
}

/// Accepts absolute `http`/`https` URLs with a host part.
pub fn normalize_source_url(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let url = Url::parse(trimmed).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Some(trimmed.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_release_page_urls() {
        assert_eq!(
            normalize_source_url("  https://verraco.bandcamp.com/album/breathe-godspeed "),
            Some("https://verraco.bandcamp.com/album/breathe-godspeed".to_string())
        );
        assert!(normalize_source_url("http://example.com").is_some());
    }

    #[test]
    fn rejects_other_inputs() {
        assert_eq!(normalize_source_url(""), None);
        assert_eq!(normalize_source_url("ftp://example.com/a"), None);
        assert_eq!(normalize_source_url("https://"), None);
        assert_eq!(normalize_source_url("https://bad host/x"), None);
        assert_eq!(normalize_source_url("verraco.bandcamp.com"), None);
    }

    #[test]
    fn rejects_malformed_authorities() {
        for input in [
            "https://@/album",
            "https://a.com:99999/x",
            "https://a.com:abc/x",
            "http://[::1/x",
        ] {
            assert_eq!(normalize_source_url(input), None, "{}", input);
        }
    }
}
