//! Static bearer-token authentication.
//!
//! # Responsibilities
//! - Map `Authorization: Bearer <token>` to a configured identity
//! - Swap the token table atomically on config reload

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::http::{header, request::Parts};

use crate::authn::authenticator::{AuthError, AuthResponse, Authenticator};
use crate::authn::user::UserInfo;
use crate::config::schema::TokenConfig;

/// Authenticates bearer tokens against an in-memory table.
pub struct TokenAuthenticator {
    tokens: ArcSwap<HashMap<String, UserInfo>>,
}

impl TokenAuthenticator {
    pub fn new(tokens: HashMap<String, UserInfo>) -> Self {
        Self {
            tokens: ArcSwap::from_pointee(tokens),
        }
    }

    pub fn from_config(entries: &[TokenConfig]) -> Self {
        Self::new(token_table(entries))
    }

    /// Replace the token table. In-flight lookups keep the old table.
    pub fn replace(&self, entries: &[TokenConfig]) {
        let table = token_table(entries);
        tracing::info!(tokens = table.len(), "Token table reloaded");
        self.tokens.store(Arc::new(table));
    }

    pub fn len(&self) -> usize {
        self.tokens.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn token_table(entries: &[TokenConfig]) -> HashMap<String, UserInfo> {
    entries
        .iter()
        .map(|entry| {
            let user = UserInfo {
                name: entry.user.clone(),
                uid: entry.uid.clone(),
                groups: entry.groups.clone(),
                extra: Default::default(),
            };
            (entry.token.clone(), user)
        })
        .collect()
}

/// Extracts the token of a `Bearer` authorization header.
///
/// Returns `Ok(None)` when the header is absent or uses another scheme.
pub fn bearer_token(parts: &Parts) -> Result<Option<&str>, AuthError> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?;
    let mut pieces = value.trim().splitn(2, ' ');
    let scheme = pieces.next().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Ok(None);
    }
    let token = pieces.next().unwrap_or_default().trim();
    if token.is_empty() {
        return Ok(None);
    }
    Ok(Some(token))
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<AuthResponse>, AuthError> {
        let Some(token) = bearer_token(parts)? else {
            return Ok(None);
        };
        let tokens = self.tokens.load();
        match tokens.get(token) {
            Some(user) => Ok(Some(AuthResponse::new(user.clone()))),
            None => Err(AuthError::InvalidToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn entry(token: &str, user: &str) -> TokenConfig {
        TokenConfig {
            token: token.to_string(),
            user: user.to_string(),
            uid: format!("uid-{}", user),
            groups: vec!["devs".to_string()],
        }
    }

    fn parts_with_auth(value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/pods");
        if let Some(value) = value {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_known_token() {
        let authn = TokenAuthenticator::from_config(&[entry("t0k3n", "alice")]);
        let resp = authn
            .authenticate(&parts_with_auth(Some("Bearer t0k3n")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.user.name, "alice");
        assert_eq!(resp.user.uid, "uid-alice");
        assert_eq!(resp.user.groups, vec!["devs".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_token_is_error() {
        let authn = TokenAuthenticator::from_config(&[entry("t0k3n", "alice")]);
        let result = authn.authenticate(&parts_with_auth(Some("Bearer nope"))).await;
        assert_eq!(result, Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_missing_or_foreign_scheme_is_unrecognised() {
        let authn = TokenAuthenticator::from_config(&[entry("t0k3n", "alice")]);
        assert_eq!(authn.authenticate(&parts_with_auth(None)).await, Ok(None));
        assert_eq!(
            authn.authenticate(&parts_with_auth(Some("Basic YTpi"))).await,
            Ok(None)
        );
    }

    #[tokio::test]
    async fn test_replace_swaps_table() {
        let authn = TokenAuthenticator::from_config(&[entry("old", "alice")]);
        authn.replace(&[entry("new", "bob")]);
        assert_eq!(authn.len(), 1);
        let resp = authn
            .authenticate(&parts_with_auth(Some("Bearer new")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resp.user.name, "bob");
    }
}
