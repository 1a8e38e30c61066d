//! Handler chain composition.
//!
//! # Responsibilities
//! - Wrap an API router with every stage, in one fixed order
//! - Skip optional stages (HSTS, CORS) when unconfigured
//! - Time the security stages with the latency recorder
//!
//! # Data Flow
//! ```text
//! (outer) recovery → timestamp → hsts → cache-control → request-info
//!         → wait-group → deadline → timeout → cors
//!         → authentication → audit → impersonation → authorization
//! (inner) api router
//! ```
//!
//! # Design Decisions
//! - `Router::layer` makes the last layer added the outermost, so stages are
//!   applied innermost first
//! - A tracked stage sits between `track_started` (outside) and
//!   `track_completed` (inside)

use std::sync::Arc;
use std::time::Duration;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;

use crate::audit::AuditSink;
use crate::authn::Authenticator;
use crate::authz::{AlwaysAllow, Authorizer};
use crate::filters::audit::{with_audit, AuditState};
use crate::filters::authentication::{with_authentication, AuthenticationState};
use crate::filters::authorization::{with_authorization, AuthorizationState};
use crate::filters::cors::cors_layer;
use crate::filters::deadline::{with_request_deadline, DeadlineState};
use crate::filters::headers::{cache_control_layer, hsts_layer};
use crate::filters::impersonation::{with_impersonation, ImpersonationState};
use crate::filters::latency::{track_completed, track_started, TrackState};
use crate::filters::recovery::recovery_layer;
use crate::filters::request_info::{with_request_info_stage, RequestInfoState};
use crate::filters::timeout::with_request_timeout;
use crate::filters::timestamp::with_request_received_timestamp;
use crate::filters::waitgroup::with_wait_group;
use crate::filters::{FilterLatencyRecorder, PrometheusRecorder};
use crate::lifecycle::SafeWaitGroup;
use crate::request::info::{RequestInfoFactory, RequestInfoResolver};
use crate::request::long_running::{default_long_running_check, LongRunningCheck};

/// Inputs of [`build_handler_chain`].
#[derive(Clone)]
pub struct ChainConfig {
    /// Regular expressions for allowed origins. Empty disables CORS.
    pub cors_allowed_origins: Vec<String>,
    /// Strict-Transport-Security directives. Empty disables HSTS.
    pub hsts_directives: Vec<String>,
    pub request_timeout: Duration,
    pub min_request_timeout: Duration,
    pub long_running: LongRunningCheck,
    /// `None` lets every request through unauthenticated.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub authorizer: Arc<dyn Authorizer>,
    pub audit_sink: Option<Arc<dyn AuditSink>>,
    pub latency_recorder: Arc<dyn FilterLatencyRecorder>,
    pub wait_group: SafeWaitGroup,
    pub request_info_resolver: Arc<dyn RequestInfoResolver>,
}

impl ChainConfig {
    pub fn new(wait_group: SafeWaitGroup) -> Self {
        Self {
            cors_allowed_origins: Vec::new(),
            hsts_directives: Vec::new(),
            request_timeout: Duration::from_secs(60),
            min_request_timeout: Duration::from_secs(1800),
            long_running: default_long_running_check(),
            authenticator: None,
            authorizer: Arc::new(AlwaysAllow),
            audit_sink: None,
            latency_recorder: Arc::new(PrometheusRecorder),
            wait_group,
            request_info_resolver: Arc::new(RequestInfoFactory::default()),
        }
    }
}

impl std::fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConfig")
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("hsts_directives", &self.hsts_directives)
            .field("request_timeout", &self.request_timeout)
            .field("min_request_timeout", &self.min_request_timeout)
            .field("authenticator", &self.authenticator.is_some())
            .field("audit", &self.audit_sink.is_some())
            .finish()
    }
}

fn tracked<S>(router: Router, name: &'static str, cfg: &ChainConfig, stage: S) -> Router
where
    S: FnOnce(Router) -> Router,
{
    let track = TrackState::new(name, cfg.latency_recorder.clone());
    let inner = router.layer(from_fn_with_state(track.clone(), track_completed));
    stage(inner).layer(from_fn_with_state(track, track_started))
}

/// Wrap `api` with the full handler chain.
pub fn build_handler_chain(api: Router, cfg: ChainConfig) -> Router {
    let authorization = AuthorizationState {
        authorizer: cfg.authorizer.clone(),
    };
    let mut router = tracked(api, "authorization", &cfg, |r| {
        r.layer(from_fn_with_state(authorization, with_authorization))
    });

    let impersonation = ImpersonationState {
        authorizer: cfg.authorizer.clone(),
    };
    router = tracked(router, "impersonation", &cfg, |r| {
        r.layer(from_fn_with_state(impersonation, with_impersonation))
    });

    let audit = AuditState {
        sink: cfg.audit_sink.clone(),
    };
    router = tracked(router, "audit", &cfg, |r| {
        r.layer(from_fn_with_state(audit, with_audit))
    });

    let authentication = AuthenticationState {
        authenticator: cfg.authenticator.clone(),
        audit_sink: cfg.audit_sink.clone(),
    };
    router = tracked(router, "authentication", &cfg, |r| {
        r.layer(from_fn_with_state(authentication, with_authentication))
    });

    if let Some(cors) = cors_layer(&cfg.cors_allowed_origins) {
        router = router.layer(cors);
    }

    router = router
        .layer(from_fn(with_request_timeout))
        .layer(from_fn_with_state(
            DeadlineState {
                request_timeout_max: cfg.request_timeout,
                min_request_timeout: cfg.min_request_timeout,
            },
            with_request_deadline,
        ))
        .layer(from_fn_with_state(cfg.wait_group.clone(), with_wait_group))
        .layer(from_fn_with_state(
            RequestInfoState {
                resolver: cfg.request_info_resolver.clone(),
                long_running: cfg.long_running.clone(),
            },
            with_request_info_stage,
        ))
        .layer(cache_control_layer());

    if let Some(hsts) = hsts_layer(&cfg.hsts_directives) {
        router = router.layer(hsts);
    }

    router
        .layer(from_fn(with_request_received_timestamp))
        .layer(recovery_layer())
}
