//! Request-info stage: resolves RequestInfo and the long-running verdict.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::request::context::{with_request_info, RequestContext};
use crate::request::info::RequestInfoResolver;
use crate::request::long_running::{LongRunningCheck, LongRunningKey};

#[derive(Clone)]
pub struct RequestInfoState {
    pub resolver: Arc<dyn RequestInfoResolver>,
    pub long_running: LongRunningCheck,
}

pub async fn with_request_info_stage(
    State(state): State<RequestInfoState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = RequestContext::of(&req);
    let (parts, body) = req.into_parts();

    let info = match state.resolver.new_request_info(&parts) {
        Ok(info) => info,
        Err(e) => {
            return ApiError::from_internal(format!("failed to create RequestInfo: {}", e))
                .into_response()
        }
    };
    let long_running = (state.long_running)(&parts, &info);

    let mut req = Request::from_parts(parts, body);
    with_request_info(&ctx, info)
        .with::<LongRunningKey>(long_running)
        .attach(&mut req);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::context::request_info_from;
    use crate::request::long_running::is_long_running;
    use crate::request::{default_long_running_check, RequestInfoFactory};
    use axum::{middleware::from_fn_with_state, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        let state = RequestInfoState {
            resolver: Arc::new(RequestInfoFactory::default()),
            long_running: default_long_running_check(),
        };
        Router::new()
            .route(
                "/{*path}",
                get(|req: Request<Body>| async move {
                    let ctx = RequestContext::of(&req);
                    let info = request_info_from(&ctx).unwrap();
                    format!("{} {} {}", info.verb, info.resource, is_long_running(&ctx))
                }),
            )
            .layer(from_fn_with_state(state, with_request_info_stage))
    }

    async fn call(uri: &str) -> String {
        let resp = app()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_stores_info_and_verdict() {
        assert_eq!(call("/api/v1/namespaces/ns/pods").await, "list pods false");
        assert_eq!(
            call("/api/v1/namespaces/ns/pods?watch=true").await,
            "watch pods true"
        );
    }
}
