//! Response hardening headers: HSTS and cache control.
//!
//! Both are set only when the handler has not chosen a value itself.

use axum::http::{header, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;

pub const DEFAULT_CACHE_CONTROL: &str = "no-cache, private";

/// `Strict-Transport-Security` from the configured directives, or `None` when
/// none are configured.
pub fn hsts_layer(directives: &[String]) -> Option<SetResponseHeaderLayer<HeaderValue>> {
    if directives.is_empty() {
        return None;
    }
    let value = directives
        .iter()
        .map(|d| d.trim())
        .collect::<Vec<_>>()
        .join("; ");
    match HeaderValue::from_str(&value) {
        Ok(value) => Some(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            value,
        )),
        Err(e) => {
            tracing::error!(value = %value, error = %e, "Invalid HSTS directives, header disabled");
            None
        }
    }
}

pub fn cache_control_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(
        header::CACHE_CONTROL,
        HeaderValue::from_static(DEFAULT_CACHE_CONTROL),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, response::IntoResponse, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_hsts_joined_and_cache_control_defaulted() {
        let directives = vec!["max-age=31536000".to_string(), "includeSubDomains".to_string()];
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/cached",
                get(|| async { ([(header::CACHE_CONTROL, "max-age=60")], "ok").into_response() }),
            )
            .layer(cache_control_layer())
            .layer(hsts_layer(&directives).unwrap());

        let resp = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            resp.headers()[header::STRICT_TRANSPORT_SECURITY],
            "max-age=31536000; includeSubDomains"
        );
        assert_eq!(resp.headers()[header::CACHE_CONTROL], DEFAULT_CACHE_CONTROL);

        let resp = app
            .oneshot(Request::get("/cached").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "max-age=60");
    }

    #[test]
    fn test_hsts_skipped_without_directives() {
        assert!(hsts_layer(&[]).is_none());
    }
}
