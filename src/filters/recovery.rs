//! Panic recovery, the outermost stage.

use std::any::Any;

use axum::response::{IntoResponse, Response};
use tower_http::catch_panic::CatchPanicLayer;

use crate::error::ApiError;
use crate::observability::logging::panic_message;

pub type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Turns a panic anywhere below into a generic 500.
///
/// The panic value is logged, never written to the client. Location and
/// backtrace come from the process panic hook.
pub fn recovery_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(handle_panic as PanicHandler)
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(panic = %panic_message(payload.as_ref()), "Request handler panicked");
    ApiError::internal("Internal Server Error").into_response()
}
