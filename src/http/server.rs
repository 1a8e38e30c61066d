//! API server assembly.
//!
//! # Responsibilities
//! - Build authenticators, authorizers and the audit sink from config
//! - Wrap the API router with the handler chain plus transport layers
//! - Bind the listener and hand everything to the shutdown coordinator
//!
//! # Data Flow
//! ```text
//! ServerConfig
//!     → ServerComponents (authn, authz, audit, reload targets)
//!     → ChainConfig → build_handler_chain(api)
//!     → request-id + body limit + TraceLayer
//!     → lifecycle::start(router, listener, wait_group, stop)
//! ```

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{AuditSink, LogSink};
use crate::authn::{AnonymousAuthenticator, Authenticator, TokenAuthenticator, UnionAuthenticator};
use crate::authz::{AlwaysAllow, AlwaysDeny, Authorizer, PolicyAuthorizer};
use crate::config::schema::{AuthorizationMode, ServerConfig};
use crate::config::watcher::ReloadTargets;
use crate::http::chain::{build_handler_chain, ChainConfig};
use crate::lifecycle::{self, SafeWaitGroup, ShutdownHandle, ShutdownOptions};
use crate::request::long_running::basic_long_running_check;

/// Collaborators built from config, plus the handles that follow config reloads.
pub struct ServerComponents {
    pub chain: ChainConfig,
    pub reload: ReloadTargets,
}

impl ServerComponents {
    pub fn from_config(config: &ServerConfig, wait_group: SafeWaitGroup) -> Self {
        let mut reload = ReloadTargets::default();
        let mut chain = ChainConfig::new(wait_group);

        chain.cors_allowed_origins = config.security.cors_allowed_origins.clone();
        chain.hsts_directives = config.security.hsts_directives.clone();
        chain.request_timeout = config.timeouts.request_timeout();
        chain.min_request_timeout = config.timeouts.min_request_timeout();
        chain.long_running = basic_long_running_check(
            config.long_running.verbs.clone(),
            config.long_running.subresources.clone(),
        );

        if config.authentication.enabled {
            let tokens = Arc::new(TokenAuthenticator::from_config(&config.authentication.tokens));
            reload.tokens = Some(tokens.clone());
            let mut union = UnionAuthenticator::new(vec![tokens]);
            if config.authentication.anonymous {
                union.push(Arc::new(AnonymousAuthenticator));
            }
            chain.authenticator = Some(Arc::new(union) as Arc<dyn Authenticator>);
        }

        chain.authorizer = match config.authorization.mode {
            AuthorizationMode::AlwaysAllow => Arc::new(AlwaysAllow) as Arc<dyn Authorizer>,
            AuthorizationMode::AlwaysDeny => Arc::new(AlwaysDeny),
            AuthorizationMode::Policy => {
                let policy = Arc::new(PolicyAuthorizer::new(config.authorization.policy.clone()));
                reload.policy = Some(policy.clone());
                policy
            }
        };

        if config.audit.enabled {
            chain.audit_sink = Some(Arc::new(LogSink) as Arc<dyn AuditSink>);
        }

        Self { chain, reload }
    }
}

/// A composed, not yet running, API server.
pub struct ApiServer {
    config: ServerConfig,
    router: Router,
    wait_group: SafeWaitGroup,
}

impl ApiServer {
    /// Wrap `api` with the handler chain described by `chain`.
    pub fn new(config: ServerConfig, api: Router, chain: ChainConfig) -> Self {
        let wait_group = chain.wait_group.clone();
        let router = build_handler_chain(api, chain)
            .layer(RequestBodyLimitLayer::new(config.listener.max_request_body_bytes))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http());
        Self {
            config,
            router,
            wait_group,
        }
    }

    /// The fully wrapped router, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn wait_group(&self) -> SafeWaitGroup {
        self.wait_group.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address. A disabled listener yields `None`.
    pub async fn bind(&self) -> Result<Option<TcpListener>, std::io::Error> {
        if !self.config.listener.enabled {
            return Ok(None);
        }
        let listener = TcpListener::bind(&self.config.listener.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "API server listening");
        Ok(Some(listener))
    }

    /// Serve on `listener` until `stop` fires and everything has drained.
    pub fn serve(self, listener: Option<TcpListener>, stop: watch::Receiver<bool>) -> ShutdownHandle {
        let options = ShutdownOptions {
            shutdown_delay: self.config.timeouts.shutdown_delay(),
            shutdown_timeout: self.config.timeouts.shutdown_timeout(),
        };
        lifecycle::start(self.router, listener, self.wait_group, options, stop)
    }

    /// Bind and serve.
    pub async fn run(self, stop: watch::Receiver<bool>) -> Result<ShutdownHandle, std::io::Error> {
        let listener = self.bind().await?;
        Ok(self.serve(listener, stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{PolicyRuleConfig, TokenConfig};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    fn config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.authentication.tokens = vec![TokenConfig {
            token: "alice-token".into(),
            user: "alice".into(),
            ..Default::default()
        }];
        config.authorization.mode = AuthorizationMode::Policy;
        config.authorization.policy = vec![PolicyRuleConfig {
            user: Some("alice".into()),
            resources: vec!["pods".into()],
            ..Default::default()
        }];
        config
    }

    fn server(config: ServerConfig) -> ApiServer {
        let components = ServerComponents::from_config(&config, SafeWaitGroup::new());
        let api = Router::new().route("/api/v1/pods", get(|| async { "pods" }));
        ApiServer::new(config, api, components.chain)
    }

    #[tokio::test]
    async fn test_authenticated_and_authorized() {
        let response = server(config())
            .router()
            .oneshot(
                Request::get("/api/v1/pods")
                    .header(header::AUTHORIZATION, "Bearer alice-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_missing_credentials_is_unauthorized() {
        let response = server(config())
            .router()
            .oneshot(Request::get("/api/v1/pods").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_anonymous_is_forbidden_by_policy() {
        let mut config = config();
        config.authentication.anonymous = true;
        let response = server(config)
            .router()
            .oneshot(Request::get("/api/v1/pods").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_reload_targets_follow_mode() {
        let components = ServerComponents::from_config(&config(), SafeWaitGroup::new());
        assert!(components.reload.tokens.is_some());
        assert!(components.reload.policy.is_some());

        let components = ServerComponents::from_config(&ServerConfig::default(), SafeWaitGroup::new());
        assert!(components.reload.policy.is_none());
    }

    #[tokio::test]
    async fn test_disabled_listener_is_done_immediately() {
        let mut config = ServerConfig::default();
        config.listener.enabled = false;
        let server = server(config);
        let (_tx, rx) = watch::channel(false);
        let handle = server.run(rx).await.unwrap();
        handle.done().await;
        assert!(handle.is_done());
    }
}
