//! Audit stage: one event per request, emitted when the request received
//! and again when the response completes (or the handler panics).

use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::audit::{lock_event, AuditEvent, AuditSink, SharedAuditEvent, Stage};
use crate::request::context::{request_info_from, user_from, with_audit_event, RequestContext};

pub const AUDIT_ID_HEADER: &str = "audit-id";

#[derive(Clone, Default)]
pub struct AuditState {
    pub sink: Option<Arc<dyn AuditSink>>,
}

/// Emits the `Panic` stage if the request future unwinds before completing.
struct PanicReporter {
    event: SharedAuditEvent,
    sink: Arc<dyn AuditSink>,
    armed: bool,
}

impl Drop for PanicReporter {
    fn drop(&mut self) {
        if self.armed && std::thread::panicking() {
            let mut event = lock_event(&self.event);
            event.response_code = Some(500);
            event.set_stage(Stage::Panic, SystemTime::now());
            self.sink.process(&event);
        }
    }
}

pub async fn with_audit(
    State(state): State<AuditState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(sink) = state.sink.clone() else {
        return next.run(req).await;
    };

    let ctx = RequestContext::of(&req);
    let audit_id = req
        .headers()
        .get(AUDIT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let verb = request_info_from(&ctx)
        .map(|info| info.verb.clone())
        .unwrap_or_else(|| req.method().as_str().to_lowercase());

    let mut event = AuditEvent::new(audit_id.clone(), verb, req.uri().to_string(), SystemTime::now());
    event.user = user_from(&ctx);
    event.user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    sink.process(&event);

    let event = event.into_shared();
    with_audit_event(&ctx, event.clone()).attach(&mut req);

    let mut reporter = PanicReporter {
        event: event.clone(),
        sink: sink.clone(),
        armed: true,
    };
    let mut response = next.run(req).await;
    reporter.armed = false;

    {
        let mut event = lock_event(&event);
        event.response_code = Some(response.status().as_u16());
        event.set_stage(Stage::ResponseComplete, SystemTime::now());
        sink.process(&event);
    }

    if let Ok(value) = HeaderValue::from_str(&audit_id) {
        response.headers_mut().insert(AUDIT_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::add_annotation;
    use axum::{middleware::from_fn_with_state, routing::get, Router};
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Recording(Mutex<Vec<AuditEvent>>);

    impl AuditSink for Recording {
        fn process(&self, event: &AuditEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_event_lifecycle_and_header() {
        let sink = Arc::new(Recording::default());
        let app = Router::new()
            .route(
                "/",
                get(|req: Request<Body>| async move {
                    add_annotation(&RequestContext::of(&req), "example.com/seen", "yes");
                    "ok"
                }),
            )
            .layer(from_fn_with_state(
                AuditState {
                    sink: Some(sink.clone()),
                },
                with_audit,
            ));

        let resp = app
            .oneshot(
                Request::get("/")
                    .header(AUDIT_ID_HEADER, "fixed-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.headers()[AUDIT_ID_HEADER], "fixed-id");

        let events = sink.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stage, Stage::RequestReceived);
        assert_eq!(events[1].stage, Stage::ResponseComplete);
        assert_eq!(events[1].audit_id, "fixed-id");
        assert_eq!(events[1].response_code, Some(200));
        assert_eq!(events[1].annotations["example.com/seen"], "yes");
    }

    #[tokio::test]
    async fn test_generates_audit_id() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(
                AuditState {
                    sink: Some(Arc::new(Recording::default())),
                },
                with_audit,
            ));
        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = resp.headers()[AUDIT_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
