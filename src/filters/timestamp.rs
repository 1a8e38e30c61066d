//! Received-timestamp stage: opens the request context.

use axum::{body::Body, http::Request, middleware::Next, response::Response};

use crate::request::context::{
    with_received_timestamp, with_trace_id, ReceivedTimestamp, RequestContext, TraceId,
};

pub const X_REQUEST_ID: &str = "x-request-id";

pub async fn with_request_received_timestamp(mut req: Request<Body>, next: Next) -> Response {
    let mut ctx = with_received_timestamp(&RequestContext::of(&req), ReceivedTimestamp::now());
    if let Some(id) = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
    {
        ctx = with_trace_id(&ctx, TraceId(id.to_string()));
    }
    ctx.attach(&mut req);
    next.run(req).await
}
