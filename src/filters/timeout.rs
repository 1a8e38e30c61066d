//! Timeout stage: enforces the context deadline.
//!
//! The rest of the chain runs in its own task. When the deadline wins, the
//! client gets a 504 and the task keeps running detached; its eventual
//! response is dropped. A panic inside the task is re-raised here so the
//! recovery stage still sees it.

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::observability::metrics;
use crate::request::context::RequestContext;
use crate::request::long_running::is_long_running;

pub const TIMEOUT_MESSAGE: &str =
    "request did not complete within requested timeout - context deadline exceeded";

pub async fn with_request_timeout(req: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext::of(&req);
    let Some(deadline) = ctx.deadline() else {
        return next.run(req).await;
    };
    if is_long_running(&ctx) {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let mut task = tokio::spawn(next.run(req));

    tokio::select! {
        joined = &mut task => match joined {
            Ok(response) => response,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => ApiError::from_internal(e).into_response(),
        },
        _ = tokio::time::sleep_until(deadline) => {
            tracing::warn!(method = %method, path = %path, "Request timed out, abandoning handler");
            metrics::record_request_abort(&method, &path);
            ApiError::timeout(TIMEOUT_MESSAGE).into_response()
        }
    }
}
