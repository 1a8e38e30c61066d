//! In-flight tracking stage.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::lifecycle::waitgroup::SafeWaitGroup;
use crate::observability::metrics;
use crate::request::context::RequestContext;
use crate::request::long_running::is_long_running;

pub const SHUTTING_DOWN_MESSAGE: &str = "apiserver is shutting down";

/// Registers non-long-running requests with the wait-group.
pub async fn with_wait_group(
    State(wait_group): State<SafeWaitGroup>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_long_running(&RequestContext::of(&req)) {
        return next.run(req).await;
    }

    let guard = match wait_group.add() {
        Ok(guard) => guard,
        Err(_) => {
            return ApiError::service_unavailable(SHUTTING_DOWN_MESSAGE, 1).into_response();
        }
    };
    metrics::set_inflight_requests(wait_group.len());

    let response = next.run(req).await;
    drop(guard);
    metrics::set_inflight_requests(wait_group.len());
    response
}
