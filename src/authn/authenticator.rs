//! The authenticator capability and its combinators.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::request::Parts;
use thiserror::Error;

use crate::authn::user::UserInfo;

/// Result of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub user: UserInfo,
}

impl AuthResponse {
    pub fn new(user: UserInfo) -> Self {
        Self { user }
    }
}

/// Hard authentication failure, as opposed to "no credentials recognised".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("{0}")]
    Other(String),

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Aggregate(Vec<AuthError>),
}

/// Resolves the identity behind a request.
///
/// `Ok(None)` means the authenticator did not recognise any credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<AuthResponse>, AuthError>;
}

#[async_trait]
impl<T: Authenticator + ?Sized> Authenticator for Arc<T> {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<AuthResponse>, AuthError> {
        (**self).authenticate(parts).await
    }
}

/// Treats every request as `system:anonymous`. Usually last in a union.
#[derive(Debug, Clone, Default)]
pub struct AnonymousAuthenticator;

#[async_trait]
impl Authenticator for AnonymousAuthenticator {
    async fn authenticate(&self, _parts: &Parts) -> Result<Option<AuthResponse>, AuthError> {
        Ok(Some(AuthResponse::new(UserInfo::anonymous())))
    }
}

/// Tries each authenticator in order; the first identity wins.
///
/// Errors are collected and only reported when nobody succeeded.
#[derive(Clone, Default)]
pub struct UnionAuthenticator {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl UnionAuthenticator {
    pub fn new(authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }

    pub fn push(&mut self, authenticator: Arc<dyn Authenticator>) {
        self.authenticators.push(authenticator);
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }
}

#[async_trait]
impl Authenticator for UnionAuthenticator {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<AuthResponse>, AuthError> {
        let mut errors = Vec::new();
        for authenticator in &self.authenticators {
            match authenticator.authenticate(parts).await {
                Ok(Some(resp)) => return Ok(Some(resp)),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        match errors.len() {
            0 => Ok(None),
            1 => Err(errors.remove(0)),
            _ => Err(AuthError::Aggregate(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    struct Fixed(Result<Option<AuthResponse>, AuthError>);

    #[async_trait]
    impl Authenticator for Fixed {
        async fn authenticate(&self, _parts: &Parts) -> Result<Option<AuthResponse>, AuthError> {
            self.0.clone()
        }
    }

    fn parts() -> Parts {
        Request::builder().uri("/").body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_union_first_success_wins() {
        let union = UnionAuthenticator::new(vec![
            Arc::new(Fixed(Err(AuthError::InvalidToken))),
            Arc::new(Fixed(Ok(None))),
            Arc::new(Fixed(Ok(Some(AuthResponse::new(UserInfo::new("bob")))))),
            Arc::new(AnonymousAuthenticator),
        ]);
        let resp = union.authenticate(&parts()).await.unwrap().unwrap();
        assert_eq!(resp.user.name, "bob");
    }

    #[tokio::test]
    async fn test_union_reports_errors_when_nobody_succeeds() {
        let union = UnionAuthenticator::new(vec![
            Arc::new(Fixed(Err(AuthError::InvalidToken))),
            Arc::new(Fixed(Ok(None))),
        ]);
        assert_eq!(
            union.authenticate(&parts()).await,
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn test_union_empty_is_unrecognised() {
        let union = UnionAuthenticator::default();
        assert_eq!(union.authenticate(&parts()).await, Ok(None));
    }
}
