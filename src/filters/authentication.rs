//! Authentication stage.
//!
//! # Responsibilities
//! - Resolve the caller's identity and attach it to the context
//! - Strip credential headers once they have been consumed
//! - Answer 401 (with a failed-authentication audit event) otherwise
//!
//! # Design Decisions
//! - No authenticator configured means the stage is a pass-through
//! - Authenticator errors are logged but never shown to the client

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::{
    body::Body,
    extract::State,
    http::{header, request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink, Stage};
use crate::authn::Authenticator;
use crate::error::ApiError;
use crate::observability::metrics::{self, AuthResult};
use crate::request::context::{request_info_from, with_user, RequestContext};

const REMOTE_HEADER_PREFIX: &str = "x-remote-";

#[derive(Clone, Default)]
pub struct AuthenticationState {
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub audit_sink: Option<Arc<dyn AuditSink>>,
}

pub async fn with_authentication(
    State(state): State<AuthenticationState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(authenticator) = state.authenticator.as_ref() else {
        tracing::warn!("Authentication is disabled");
        return next.run(req).await;
    };

    let started = Instant::now();
    let (mut parts, body) = req.into_parts();
    let outcome = authenticator.authenticate(&parts).await;

    let response = match outcome {
        Ok(Some(response)) => response,
        Ok(None) => {
            metrics::record_authentication(AuthResult::Failure, started.elapsed());
            return unauthorized(&state, &parts);
        }
        Err(e) => {
            metrics::record_authentication(AuthResult::Error, started.elapsed());
            tracing::error!(error = %e, "Unable to authenticate the request");
            return unauthorized(&state, &parts);
        }
    };
    metrics::record_authentication(AuthResult::Success, started.elapsed());
    metrics::record_authenticated_user(&response.user.name);

    strip_credential_headers(&mut parts.headers);
    let ctx = parts
        .extensions
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();
    let mut req = Request::from_parts(parts, body);
    with_user(&ctx, response.user).attach(&mut req);
    next.run(req).await
}

fn strip_credential_headers(headers: &mut HeaderMap) {
    headers.remove(header::AUTHORIZATION);
    let remote: Vec<_> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(REMOTE_HEADER_PREFIX))
        .cloned()
        .collect();
    for name in remote {
        headers.remove(name);
    }
}

/// Which credential kinds the request presented.
pub fn attempted_auth_methods(parts: &Parts) -> String {
    let mut methods = Vec::new();
    let authorization = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    let scheme = authorization.split(' ').next().unwrap_or_default();
    if scheme.eq_ignore_ascii_case("basic") {
        methods.push("basic");
    }
    if scheme.eq_ignore_ascii_case("bearer") && authorization.contains(' ') {
        methods.push("bearer");
    }
    let has_access_token = parts
        .uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .any(|(k, v)| k == "access_token" && !v.trim().is_empty())
        })
        .unwrap_or(false);
    if has_access_token {
        methods.push("access_token");
    }

    if methods.is_empty() {
        "Authentication failed, no credentials provided".to_string()
    } else {
        format!("Authentication failed, attempted: {}", methods.join(", "))
    }
}

fn unauthorized(state: &AuthenticationState, parts: &Parts) -> Response {
    if let Some(sink) = &state.audit_sink {
        let ctx = parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default();
        let verb = request_info_from(&ctx)
            .map(|info| info.verb.clone())
            .unwrap_or_else(|| parts.method.as_str().to_lowercase());
        let now = SystemTime::now();
        let mut event = AuditEvent::new(Uuid::new_v4().to_string(), verb, parts.uri.to_string(), now);
        event.user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        event.response_code = Some(StatusCode::UNAUTHORIZED.as_u16());
        event.response_message = Some(attempted_auth_methods(parts));
        event.set_stage(Stage::ResponseComplete, now);
        sink.process(&event);
    }
    ApiError::unauthorized("Unauthorized").into_response()
}
