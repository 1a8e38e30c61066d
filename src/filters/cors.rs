//! Cross-origin resource sharing.

use axum::http::{header, request::Parts, HeaderName, HeaderValue, Method};
use regex::Regex;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// CORS layer accepting origins that match any of `allowed_origins`.
///
/// Returns `None` when no patterns are configured. Patterns that fail to
/// compile are logged and ignored.
pub fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    if allowed_origins.is_empty() {
        return None;
    }
    let patterns: Vec<Regex> = allowed_origins
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!(pattern = %pattern, error = %e, "Invalid CORS origin pattern");
                None
            }
        })
        .collect();

    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
        origin
            .to_str()
            .map(|origin| patterns.iter().any(|re| re.is_match(origin)))
            .unwrap_or(false)
    });

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([
                Method::POST,
                Method::GET,
                Method::OPTIONS,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                header::CONTENT_LENGTH,
                header::ACCEPT_ENCODING,
                HeaderName::from_static("x-csrf-token"),
                header::AUTHORIZATION,
                HeaderName::from_static("x-requested-with"),
                header::IF_MODIFIED_SINCE,
            ])
            .expose_headers([header::DATE])
            .allow_credentials(true),
    )
}
