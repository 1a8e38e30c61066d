//! HTTP-facing error type and the `Status` response body.
//!
//! # Responsibilities
//! - Classify every client-visible failure with a reason and status code
//! - Render failures as a structured JSON `Status` body
//! - Keep internal detail in the logs, never in the response
//!
//! # Design Decisions
//! - One error type crosses the HTTP boundary; module errors convert into it
//! - Internal errors carry a generic client message plus a logged cause

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusReason {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    AlreadyExists,
    MethodNotAllowed,
    RequestEntityTooLarge,
    UnsupportedMediaType,
    NotAcceptable,
    Timeout,
    ServiceUnavailable,
    InternalError,
    Unknown,
}

impl StatusReason {
    /// Default HTTP status code for this reason.
    pub fn code(self) -> StatusCode {
        match self {
            StatusReason::BadRequest => StatusCode::BAD_REQUEST,
            StatusReason::Unauthorized => StatusCode::UNAUTHORIZED,
            StatusReason::Forbidden => StatusCode::FORBIDDEN,
            StatusReason::NotFound => StatusCode::NOT_FOUND,
            StatusReason::AlreadyExists => StatusCode::CONFLICT,
            StatusReason::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            StatusReason::RequestEntityTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            StatusReason::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            StatusReason::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            StatusReason::Timeout => StatusCode::GATEWAY_TIMEOUT,
            StatusReason::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            StatusReason::InternalError | StatusReason::Unknown => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// A failure that is written to the client as a `Status` body.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    reason: StatusReason,
    code: StatusCode,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(reason: StatusReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            code: reason.code(),
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusReason::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusReason::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusReason::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusReason::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(StatusReason::AlreadyExists, message)
    }

    pub fn too_large(limit: usize) -> Self {
        Self::new(
            StatusReason::RequestEntityTooLarge,
            format!("the request body exceeds the limit of {} bytes", limit),
        )
    }

    pub fn unsupported_media_type(content_type: &str) -> Self {
        Self::new(
            StatusReason::UnsupportedMediaType,
            format!("the body of the request was in an unknown format - accepted media types include: application/json, application/x-www-form-urlencoded (got {:?})", content_type),
        )
    }

    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self::new(StatusReason::NotAcceptable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusReason::Timeout, message)
    }

    /// 503 with a `Retry-After` hint.
    pub fn service_unavailable(message: impl Into<String>, retry_after_secs: u64) -> Self {
        let mut err = Self::new(StatusReason::ServiceUnavailable, message);
        err.retry_after_secs = Some(retry_after_secs);
        err
    }

    /// 500 whose message is authored by this crate and safe to show.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusReason::InternalError, message)
    }

    /// 500 for an unexpected cause. The cause is logged, the client sees a generic message.
    pub fn from_internal(cause: impl std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "Internal error");
        Self::new(StatusReason::InternalError, "Internal error occurred")
    }

    pub fn with_code(mut self, code: StatusCode) -> Self {
        self.code = code;
        self
    }

    pub fn reason(&self) -> StatusReason {
        self.reason
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Wire representation of this error.
    pub fn status(&self) -> Status {
        Status {
            kind: "Status".to_string(),
            api_version: "v1".to_string(),
            status: "Failure".to_string(),
            message: self.message.clone(),
            reason: self.reason,
            code: self.code.as_u16(),
        }
    }
}

/// JSON body written for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub kind: String,
    pub api_version: String,
    pub status: String,
    pub message: String,
    pub reason: StatusReason,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match serde_json::to_vec(&self.status()) {
            Ok(body) => body,
            Err(_) => self.message.clone().into_bytes(),
        };

        let mut response = (self.code, body).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );
        if let Some(secs) = self.retry_after_secs {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_body_shape() {
        let err = ApiError::forbidden("nope");
        let json = serde_json::to_value(err.status()).unwrap();
        assert_eq!(json["kind"], "Status");
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["status"], "Failure");
        assert_eq!(json["reason"], "Forbidden");
        assert_eq!(json["code"], 403);
        assert_eq!(json["message"], "nope");
    }

    #[test]
    fn test_service_unavailable_sets_retry_after() {
        let response = ApiError::service_unavailable("draining", 1).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn test_from_internal_hides_cause() {
        let err = ApiError::from_internal("db password rejected");
        assert_eq!(err.code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message().contains("password"));
    }
}
