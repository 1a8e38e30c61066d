//! The authorizer capability, request attributes and simple authorizers.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::authn::UserInfo;
use crate::request::context::RequestContext;
use crate::request::info::RequestInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Deny,
    Allow,
    NoOpinion,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("{0}")]
    Evaluation(String),

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Aggregate(Vec<AuthzError>),
}

/// Everything an authorizer may look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub user: Option<UserInfo>,
    pub verb: String,
    pub namespace: String,
    pub api_group: String,
    pub api_version: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
    pub resource_request: bool,
    pub path: String,
}

impl Attributes {
    pub fn from_request_info(user: Option<UserInfo>, info: &RequestInfo) -> Self {
        Self {
            user,
            verb: info.verb.clone(),
            namespace: info.namespace.clone(),
            api_group: info.api_group.clone(),
            api_version: info.api_version.clone(),
            resource: info.resource.clone(),
            subresource: info.subresource.clone(),
            name: info.name.clone(),
            resource_request: info.is_resource_request,
            path: info.path.clone(),
        }
    }

    pub fn username(&self) -> &str {
        self.user.as_ref().map(|u| u.name.as_str()).unwrap_or("")
    }

    pub fn groups(&self) -> &[String] {
        self.user.as_ref().map(|u| u.groups.as_slice()).unwrap_or(&[])
    }
}

/// Decides whether a request may proceed.
///
/// The returned string is a human-readable reason, possibly empty.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<(Decision, String), AuthzError>;
}

#[async_trait]
impl<T: Authorizer + ?Sized> Authorizer for Arc<T> {
    async fn authorize(
        &self,
        ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<(Decision, String), AuthzError> {
        (**self).authorize(ctx, attributes).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlwaysAllow;

#[async_trait]
impl Authorizer for AlwaysAllow {
    async fn authorize(
        &self,
        _ctx: &RequestContext,
        _attributes: &Attributes,
    ) -> Result<(Decision, String), AuthzError> {
        Ok((Decision::Allow, String::new()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlwaysDeny;

#[async_trait]
impl Authorizer for AlwaysDeny {
    async fn authorize(
        &self,
        _ctx: &RequestContext,
        _attributes: &Attributes,
    ) -> Result<(Decision, String), AuthzError> {
        Ok((Decision::NoOpinion, "Everything is forbidden.".to_string()))
    }
}

/// Asks each authorizer in turn; the first Allow or Deny wins.
#[derive(Clone, Default)]
pub struct UnionAuthorizer {
    authorizers: Vec<Arc<dyn Authorizer>>,
}

impl UnionAuthorizer {
    pub fn new(authorizers: Vec<Arc<dyn Authorizer>>) -> Self {
        Self { authorizers }
    }
}

#[async_trait]
impl Authorizer for UnionAuthorizer {
    async fn authorize(
        &self,
        ctx: &RequestContext,
        attributes: &Attributes,
    ) -> Result<(Decision, String), AuthzError> {
        let mut errors = Vec::new();
        let mut reasons = Vec::new();

        for authorizer in &self.authorizers {
            match authorizer.authorize(ctx, attributes).await {
                Ok((Decision::NoOpinion, reason)) => {
                    if !reason.is_empty() {
                        reasons.push(reason);
                    }
                }
                Ok(decided) => return Ok(decided),
                Err(e) => errors.push(e),
            }
        }

        match errors.len() {
            0 => Ok((Decision::NoOpinion, reasons.join("\n"))),
            1 => Err(errors.remove(0)),
            _ => Err(AuthzError::Aggregate(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<(Decision, String), AuthzError>);

    #[async_trait]
    impl Authorizer for Fixed {
        async fn authorize(
            &self,
            _ctx: &RequestContext,
            _attributes: &Attributes,
        ) -> Result<(Decision, String), AuthzError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_union_first_decision_wins() {
        let union = UnionAuthorizer::new(vec![
            Arc::new(Fixed(Ok((Decision::NoOpinion, "no rule".into())))),
            Arc::new(Fixed(Ok((Decision::Deny, "blocked".into())))),
            Arc::new(AlwaysAllow),
        ]);
        let (decision, reason) = union
            .authorize(&RequestContext::new(), &Attributes::default())
            .await
            .unwrap();
        assert_eq!(decision, Decision::Deny);
        assert_eq!(reason, "blocked");
    }

    #[tokio::test]
    async fn test_union_collects_no_opinion_reasons() {
        let union = UnionAuthorizer::new(vec![Arc::new(AlwaysDeny), Arc::new(AlwaysDeny)]);
        let (decision, reason) = union
            .authorize(&RequestContext::new(), &Attributes::default())
            .await
            .unwrap();
        assert_eq!(decision, Decision::NoOpinion);
        assert_eq!(reason, "Everything is forbidden.\nEverything is forbidden.");
    }

    #[tokio::test]
    async fn test_union_error_without_decision() {
        let union = UnionAuthorizer::new(vec![Arc::new(Fixed(Err(AuthzError::Evaluation(
            "backend down".into(),
        ))))]);
        let result = union
            .authorize(&RequestContext::new(), &Attributes::default())
            .await;
        assert_eq!(result, Err(AuthzError::Evaluation("backend down".into())));
    }

    #[test]
    fn test_attributes_from_request_info() {
        let info = RequestInfo {
            is_resource_request: true,
            verb: "get".into(),
            namespace: "ns".into(),
            resource: "pods".into(),
            name: "web".into(),
            path: "/api/v1/namespaces/ns/pods/web".into(),
            ..Default::default()
        };
        let attrs = Attributes::from_request_info(Some(UserInfo::new("alice")), &info);
        assert_eq!(attrs.username(), "alice");
        assert!(attrs.resource_request);
        assert_eq!(attrs.resource, "pods");
        assert_eq!(attrs.namespace, "ns");
    }
}
