//! Impersonation stage.
//!
//! # Responsibilities
//! - Parse `Impersonate-*` headers into impersonation requests
//! - Authorize each requested aspect with the `impersonate` verb
//! - Replace the request's user with the impersonated identity
//!
//! # Data Flow
//! ```text
//! Impersonate-User / -Group / -Uid / -Extra-<key>
//!     → build_impersonation_requests (400 if user missing)
//!     → Authorizer (verb "impersonate", one check per aspect; 403 on denial)
//!     → new UserInfo in context, audit event updated, headers stripped
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::audit::lock_event;
use crate::authn::user::{
    split_service_account_username, ALL_AUTHENTICATED, ALL_UNAUTHENTICATED, ANONYMOUS,
};
use crate::authn::UserInfo;
use crate::authz::{Attributes, Authorizer, Decision};
use crate::error::ApiError;
use crate::filters::authorization::forbidden;
use crate::request::context::{audit_event_from, user_from, with_user, RequestContext};

pub const IMPERSONATE_USER_HEADER: &str = "impersonate-user";
pub const IMPERSONATE_GROUP_HEADER: &str = "impersonate-group";
pub const IMPERSONATE_UID_HEADER: &str = "impersonate-uid";
pub const IMPERSONATE_EXTRA_HEADER_PREFIX: &str = "impersonate-extra-";

const ALL_SERVICE_ACCOUNTS_GROUP: &str = "system:serviceaccounts";
const AUTHENTICATION_GROUP: &str = "authentication.k8s.io";

#[derive(Clone)]
pub struct ImpersonationState {
    pub authorizer: Arc<dyn Authorizer>,
}

/// One aspect of the identity being assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImpersonationRequest {
    User(String),
    ServiceAccount { namespace: String, name: String },
    Group(String),
    UserExtra { key: String, value: String },
    Uid(String),
}

/// Parses the impersonation headers. Groups, extras or a UID without a user are rejected.
pub fn build_impersonation_requests(
    headers: &HeaderMap,
) -> Result<Vec<ImpersonationRequest>, ApiError> {
    let mut requests = Vec::new();

    let requested_user = header_str(headers, IMPERSONATE_USER_HEADER);
    let has_user = !requested_user.is_empty();
    if has_user {
        match split_service_account_username(requested_user) {
            Some((namespace, name)) => requests.push(ImpersonationRequest::ServiceAccount {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            None => requests.push(ImpersonationRequest::User(requested_user.to_string())),
        }
    }

    let mut has_groups = false;
    for group in headers.get_all(IMPERSONATE_GROUP_HEADER) {
        has_groups = true;
        if let Ok(group) = group.to_str() {
            requests.push(ImpersonationRequest::Group(group.to_string()));
        }
    }

    let mut has_extra = false;
    for (name, value) in headers {
        let Some(raw_key) = name.as_str().strip_prefix(IMPERSONATE_EXTRA_HEADER_PREFIX) else {
            continue;
        };
        has_extra = true;
        let key = unescape_extra_key(raw_key);
        if let Ok(value) = value.to_str() {
            requests.push(ImpersonationRequest::UserExtra {
                key,
                value: value.to_string(),
            });
        }
    }

    let requested_uid = header_str(headers, IMPERSONATE_UID_HEADER);
    let has_uid = !requested_uid.is_empty();
    if has_uid {
        requests.push(ImpersonationRequest::Uid(requested_uid.to_string()));
    }

    if (has_groups || has_extra || has_uid) && !has_user {
        return Err(ApiError::bad_request(format!(
            "requested {:?} without impersonating a user",
            requests
        )));
    }
    Ok(requests)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Extra keys are percent-encoded on the wire; header names are already lowercase.
fn unescape_extra_key(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(key) => key.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn strip_impersonation_headers(headers: &mut HeaderMap) {
    headers.remove(IMPERSONATE_USER_HEADER);
    headers.remove(IMPERSONATE_GROUP_HEADER);
    headers.remove(IMPERSONATE_UID_HEADER);
    let extras: Vec<_> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(IMPERSONATE_EXTRA_HEADER_PREFIX))
        .cloned()
        .collect();
    for name in extras {
        headers.remove(name);
    }
}

pub async fn with_impersonation(
    State(state): State<ImpersonationState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let requests = match build_impersonation_requests(req.headers()) {
        Ok(requests) => requests,
        Err(e) => {
            tracing::debug!(error = %e, "Invalid impersonation request");
            return e.into_response();
        }
    };
    if requests.is_empty() {
        return next.run(req).await;
    }

    let ctx = RequestContext::of(&req);
    let Some(requestor) = user_from(&ctx) else {
        return ApiError::internal("no user found for request").into_response();
    };

    let groups_specified = req.headers().contains_key(IMPERSONATE_GROUP_HEADER);
    let mut username = String::new();
    let mut groups: Vec<String> = Vec::new();
    let mut uid = String::new();
    let mut extra: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for request in &requests {
        let mut attributes = Attributes {
            user: Some(requestor.clone()),
            verb: "impersonate".to_string(),
            resource_request: true,
            ..Default::default()
        };
        match request {
            ImpersonationRequest::ServiceAccount { namespace, name } => {
                attributes.resource = "serviceaccounts".to_string();
                attributes.namespace = namespace.clone();
                attributes.name = name.clone();
                username = crate::authn::user::service_account_username(namespace, name);
                if !groups_specified {
                    groups = vec![
                        ALL_SERVICE_ACCOUNTS_GROUP.to_string(),
                        format!("{}:{}", ALL_SERVICE_ACCOUNTS_GROUP, namespace),
                    ];
                }
            }
            ImpersonationRequest::User(name) => {
                attributes.resource = "users".to_string();
                attributes.name = name.clone();
                username = name.clone();
            }
            ImpersonationRequest::Group(name) => {
                attributes.resource = "groups".to_string();
                attributes.name = name.clone();
                groups.push(name.clone());
            }
            ImpersonationRequest::UserExtra { key, value } => {
                attributes.api_group = AUTHENTICATION_GROUP.to_string();
                attributes.api_version = "v1".to_string();
                attributes.resource = "userextras".to_string();
                attributes.subresource = key.clone();
                attributes.name = value.clone();
                extra.entry(key.clone()).or_default().push(value.clone());
            }
            ImpersonationRequest::Uid(value) => {
                attributes.api_group = AUTHENTICATION_GROUP.to_string();
                attributes.api_version = "v1".to_string();
                attributes.resource = "uids".to_string();
                attributes.name = value.clone();
                uid = value.clone();
            }
        }

        match state.authorizer.authorize(&ctx, &attributes).await {
            Ok((Decision::Allow, _)) => {}
            Ok((_, reason)) => {
                tracing::debug!(user = %requestor.name, reason = %reason, "Impersonation forbidden");
                return forbidden(&attributes, &reason).into_response();
            }
            Err(e) => {
                tracing::debug!(user = %requestor.name, error = %e, "Impersonation authorization failed");
                return forbidden(&attributes, &e.to_string()).into_response();
            }
        }
    }

    if username == ANONYMOUS {
        if !groups.iter().any(|g| g == ALL_UNAUTHENTICATED) {
            groups.push(ALL_UNAUTHENTICATED.to_string());
        }
    } else if !groups
        .iter()
        .any(|g| g == ALL_AUTHENTICATED || g == ALL_UNAUTHENTICATED)
    {
        groups.push(ALL_AUTHENTICATED.to_string());
    }

    let impersonated = UserInfo {
        name: username,
        uid,
        groups,
        extra,
    };
    tracing::info!(user = %requestor.name, acting_as = %impersonated.name, "User is acting as another identity");

    if let Some(event) = audit_event_from(&ctx) {
        lock_event(&event).impersonated_user = Some(impersonated.clone());
    }
    strip_impersonation_headers(req.headers_mut());
    with_user(&ctx, impersonated).attach(&mut req);
    next.run(req).await
}
