//! Converting handler results into HTTP responses.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::ApiError;

/// The error a handler returned, kept on the response for outer stages.
#[derive(Debug, Clone)]
pub struct ErrorAttribute(pub Arc<ApiError>);

/// Render `err` and remember it on the response.
pub fn error_response(err: ApiError) -> Response {
    let shared = Arc::new(err);
    let mut response = shared.as_ref().clone().into_response();
    response.extensions_mut().insert(ErrorAttribute(shared));
    response
}

/// Error carried by a response produced through [`error_response`].
pub fn response_error(response: &Response) -> Option<Arc<ApiError>> {
    response
        .extensions()
        .get::<ErrorAttribute>()
        .map(|attr| attr.0.clone())
}

/// Serialize `value` as the JSON response body. `null` yields an empty 200.
pub fn json_response<T: Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) if body == b"null" => StatusCode::OK.into_response(),
        Ok(body) => {
            let mut response = (StatusCode::OK, body).into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => error_response(ApiError::from_internal(e)),
    }
}

/// Anything a bound handler may return.
pub trait HandlerOutput: Send + 'static {
    fn into_output(self) -> Response;
}

impl HandlerOutput for () {
    fn into_output(self) -> Response {
        StatusCode::OK.into_response()
    }
}

impl HandlerOutput for Response {
    fn into_output(self) -> Response {
        self
    }
}

impl<T, E> HandlerOutput for Result<T, E>
where
    T: Serialize + Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    fn into_output(self) -> Response {
        match self {
            Ok(value) => json_response(&value),
            Err(err) => error_response(err.into()),
        }
    }
}
