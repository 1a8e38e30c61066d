//! Body decoding and response media type checks.

use axum::http::{header, HeaderMap};
use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

pub const MIME_JSON: &str = "application/json";
pub const MIME_FORM: &str = "application/x-www-form-urlencoded";

fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Media type of the request body, without parameters.
pub fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(media_type)
        .filter(|m| !m.is_empty())
}

/// Decode `bytes` according to the request's `Content-Type`.
///
/// A missing content type is treated as JSON. An empty JSON body decodes as `null`.
pub fn decode_body<B: DeserializeOwned>(headers: &HeaderMap, bytes: &Bytes) -> Result<B, ApiError> {
    match content_type(headers).as_deref() {
        None | Some(MIME_JSON) => {
            let result = if bytes.iter().all(u8::is_ascii_whitespace) {
                serde_json::from_value(serde_json::Value::Null)
            } else {
                serde_json::from_slice(bytes)
            };
            result.map_err(|e| ApiError::bad_request(format!("unable to decode request body: {}", e)))
        }
        Some(MIME_FORM) => serde_urlencoded::from_bytes(bytes)
            .map_err(|e| ApiError::bad_request(format!("unable to decode request body: {}", e))),
        Some(other) => Err(ApiError::unsupported_media_type(other)),
    }
}

/// Rejects requests whose `Accept` header rules out JSON.
pub fn check_acceptable(headers: &HeaderMap) -> Result<(), ApiError> {
    let accepted: Vec<String> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(media_type)
        .filter(|m| !m.is_empty())
        .collect();

    if accepted.is_empty()
        || accepted
            .iter()
            .any(|m| m == MIME_JSON || m == "*/*" || m == "application/*")
    {
        return Ok(());
    }
    Err(ApiError::not_acceptable(format!(
        "only the following media types are accepted: {}",
        MIME_JSON
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Login {
        user: String,
        age: u32,
    }

    fn headers(content_type: Option<&'static str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(ct) = content_type {
            h.insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        h
    }

    #[test]
    fn test_json_and_form() {
        let json: Login = decode_body(
            &headers(Some("application/json; charset=utf-8")),
            &Bytes::from_static(br#"{"user":"a","age":3}"#),
        )
        .unwrap();
        let form: Login = decode_body(
            &headers(Some(MIME_FORM)),
            &Bytes::from_static(b"user=a&age=3"),
        )
        .unwrap();
        assert_eq!(json, form);
    }

    #[test]
    fn test_empty_body_is_null() {
        let value: Option<Login> = decode_body(&headers(None), &Bytes::new()).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_unknown_content_type() {
        let err = decode_body::<Login>(&headers(Some("application/xml")), &Bytes::from_static(b"<a/>"))
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_malformed_json() {
        let err = decode_body::<Login>(&headers(None), &Bytes::from_static(b"{")).unwrap_err();
        assert_eq!(err.code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_accept() {
        let mut h = HeaderMap::new();
        assert!(check_acceptable(&h).is_ok());
        h.insert(header::ACCEPT, HeaderValue::from_static("text/html, */*;q=0.1"));
        assert!(check_acceptable(&h).is_ok());
        h.insert(header::ACCEPT, HeaderValue::from_static("application/yaml"));
        assert_eq!(check_acceptable(&h).unwrap_err().code(), StatusCode::NOT_ACCEPTABLE);
    }
}
