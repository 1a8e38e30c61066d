//! Authorization stage and the Kubernetes-style forbidden message.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::audit::{
    add_annotation, DECISION_ALLOW, DECISION_ANNOTATION_KEY, DECISION_FORBID,
    REASON_ANNOTATION_KEY,
};
use crate::authz::{Attributes, Authorizer, Decision};
use crate::error::ApiError;
use crate::request::context::{request_info_from, user_from, RequestContext};

const REASON_ERROR: &str = "internal error";

#[derive(Clone)]
pub struct AuthorizationState {
    pub authorizer: Arc<dyn Authorizer>,
}

/// Attributes for the request, from the user and the RequestInfo in `ctx`.
pub fn authorizer_attributes(ctx: &RequestContext) -> Result<Attributes, ApiError> {
    let info = request_info_from(ctx)
        .ok_or_else(|| ApiError::from_internal("no RequestInfo found in the context"))?;
    Ok(Attributes::from_request_info(user_from(ctx), &info))
}

pub async fn with_authorization(
    State(state): State<AuthorizationState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = RequestContext::of(&req);
    let attributes = match authorizer_attributes(&ctx) {
        Ok(attributes) => attributes,
        Err(e) => return e.into_response(),
    };

    match state.authorizer.authorize(&ctx, &attributes).await {
        Ok((Decision::Allow, reason)) => {
            add_annotation(&ctx, DECISION_ANNOTATION_KEY, DECISION_ALLOW);
            add_annotation(&ctx, REASON_ANNOTATION_KEY, &reason);
            next.run(req).await
        }
        Err(e) => {
            add_annotation(&ctx, REASON_ANNOTATION_KEY, REASON_ERROR);
            ApiError::from_internal(e).into_response()
        }
        Ok((_, reason)) => {
            tracing::debug!(uri = %req.uri(), reason = %reason, "Forbidden");
            add_annotation(&ctx, DECISION_ANNOTATION_KEY, DECISION_FORBID);
            add_annotation(&ctx, REASON_ANNOTATION_KEY, &reason);
            forbidden(&attributes, &reason).into_response()
        }
    }
}

/// `User "x" cannot <verb> ...`, describing what was attempted.
pub fn forbidden_message(attributes: &Attributes) -> String {
    let username = attributes.username();
    if !attributes.resource_request {
        return format!(
            "User {:?} cannot {} path {:?}",
            username, attributes.verb, attributes.path
        );
    }

    let mut resource = attributes.resource.clone();
    if !attributes.subresource.is_empty() {
        resource = format!("{}/{}", resource, attributes.subresource);
    }
    if !attributes.namespace.is_empty() {
        return format!(
            "User {:?} cannot {} resource {:?} in API group {:?} in the namespace {:?}",
            username, attributes.verb, resource, attributes.api_group, attributes.namespace
        );
    }
    format!(
        "User {:?} cannot {} resource {:?} in API group {:?} at the cluster scope",
        username, attributes.verb, resource, attributes.api_group
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// 403 for `attributes`, with `reason` appended when present.
pub fn forbidden(attributes: &Attributes, reason: &str) -> ApiError {
    let mut detail = escape_html(&forbidden_message(attributes));
    if !reason.is_empty() {
        detail = format!("{}: {}", detail, reason);
    }

    let qualified = if attributes.api_group.is_empty() {
        attributes.resource.clone()
    } else {
        format!("{}.{}", attributes.resource, attributes.api_group)
    };
    let message = if qualified.is_empty() {
        format!("forbidden: {}", detail)
    } else if attributes.name.is_empty() {
        format!("{} is forbidden: {}", qualified, detail)
    } else {
        format!("{} {:?} is forbidden: {}", qualified, attributes.name, detail)
    };
    ApiError::forbidden(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{lock_event, AuditEvent};
    use crate::authn::UserInfo;
    use crate::authz::{AlwaysAllow, AlwaysDeny, AuthzError};
    use crate::request::context::{with_audit_event, with_request_info, with_user};
    use crate::request::info::RequestInfo;
    use async_trait::async_trait;
    use axum::{middleware::from_fn_with_state, routing::get, Router};
    use http_body_util::BodyExt;
    use std::time::SystemTime;
    use tower::ServiceExt;

    struct Broken;

    #[async_trait]
    impl Authorizer for Broken {
        async fn authorize(
            &self,
            _ctx: &RequestContext,
            _attributes: &Attributes,
        ) -> Result<(Decision, String), AuthzError> {
            Err(AuthzError::Evaluation("backend unavailable".into()))
        }
    }

    fn pods_info() -> RequestInfo {
        RequestInfo {
            is_resource_request: true,
            path: "/api/v1/namespaces/dev/pods/web".into(),
            verb: "get".into(),
            api_prefix: "api".into(),
            api_version: "v1".into(),
            namespace: "dev".into(),
            resource: "pods".into(),
            name: "web".into(),
            ..Default::default()
        }
    }

    async fn run(authorizer: Arc<dyn Authorizer>) -> (u16, String, AuditEvent) {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(AuthorizationState { authorizer }, with_authorization));

        let event = AuditEvent::new("id", "get", "/", SystemTime::now()).into_shared();
        let ctx = with_request_info(&RequestContext::new(), pods_info());
        let ctx = with_user(&ctx, UserInfo::new("alice"));
        let mut req = Request::get("/").body(Body::empty()).unwrap();
        with_audit_event(&ctx, event.clone()).attach(&mut req);

        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status().as_u16();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let snapshot = lock_event(&event).clone();
        (status, String::from_utf8_lossy(&body).into_owned(), snapshot)
    }

    #[tokio::test]
    async fn test_allow_annotates_and_continues() {
        let (status, _, event) = run(Arc::new(AlwaysAllow)).await;
        assert_eq!(status, 200);
        assert_eq!(event.annotations[DECISION_ANNOTATION_KEY], DECISION_ALLOW);
    }

    #[tokio::test]
    async fn test_deny_is_forbidden_with_reason() {
        let (status, body, event) = run(Arc::new(AlwaysDeny)).await;
        assert_eq!(status, 403);
        assert_eq!(event.annotations[DECISION_ANNOTATION_KEY], DECISION_FORBID);
        assert_eq!(event.annotations[REASON_ANNOTATION_KEY], "Everything is forbidden.");
        let status: crate::error::Status = serde_json::from_str(&body).unwrap();
        assert_eq!(
            status.message,
            "pods \"web\" is forbidden: User \"alice\" cannot get resource \"pods\" in API group \"\" in the namespace \"dev\": Everything is forbidden."
        );
    }

    #[tokio::test]
    async fn test_error_is_internal() {
        let (status, body, event) = run(Arc::new(Broken)).await;
        assert_eq!(status, 500);
        assert!(!body.contains("backend unavailable"));
        assert_eq!(event.annotations[REASON_ANNOTATION_KEY], REASON_ERROR);
        assert!(!event.annotations.contains_key(DECISION_ANNOTATION_KEY));
    }

    #[test]
    fn test_forbidden_message_shapes() {
        let path = Attributes {
            user: Some(UserInfo::new("bob")),
            verb: "get".into(),
            path: "/metrics<x>".into(),
            ..Default::default()
        };
        assert_eq!(
            forbidden(&path, "").message(),
            "forbidden: User \"bob\" cannot get path \"/metrics&lt;x&gt;\""
        );

        let cluster = Attributes {
            user: Some(UserInfo::new("bob")),
            verb: "list".into(),
            api_group: "apps".into(),
            resource: "deployments".into(),
            subresource: "scale".into(),
            resource_request: true,
            ..Default::default()
        };
        assert_eq!(
            forbidden_message(&cluster),
            "User \"bob\" cannot list resource \"deployments/scale\" in API group \"apps\" at the cluster scope"
        );
        assert!(forbidden(&cluster, "").message().starts_with("deployments.apps is forbidden: "));
    }
}
