//! Route descriptors and the web service builder.
//!
//! # Responsibilities
//! - Describe routes: method, sub-path, ACL, description, tags, filters, handler
//! - Normalize method aliases and reject unknown methods at build time
//! - Attach per-route filters in a fixed order
//! - Register ACL scopes and record per-route request metrics
//!
//! # Data Flow
//! ```text
//! WebService::build
//!     → for each Route: normalize method, join prefix + root + sub-path
//!     → resolve ACL → (filter, scope) → ScopeRegistry::register
//!     → layer filters: service filter, service filters, ACL filter, route filters
//!     → instrumented endpoint → axum MethodRouter
//!     → Router
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::observability::metrics::record_request;
use crate::rest::handler::{dispatch, Handler};
use crate::rest::params::ParamCodec;
use crate::rest::scopes::{ScopeError, ScopeRegistry};

/// Default request body limit for bound handlers.
pub const DEFAULT_BODY_LIMIT: usize = 3 * 1024 * 1024;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unsupported method {method:?} for route {path}")]
    UnsupportedMethod { method: String, path: String },

    #[error("duplicate route {method} {path}")]
    Duplicate { method: String, path: String },

    #[error("route {path} uses acl {acl:?} but no acl resolver is configured")]
    NoAclResolver { acl: String, path: String },

    #[error("acl {acl:?}: {message}")]
    Acl { acl: String, message: String },

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// A per-route middleware step.
pub type RouteFilter =
    Arc<dyn Fn(Request<Body>, Next) -> BoxFuture<'static, Response> + Send + Sync>;

/// Wrap an async function as a [`RouteFilter`].
pub fn route_filter<F, Fut>(f: F) -> RouteFilter
where
    F: Fn(Request<Body>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |req, next| Box::pin(f(req, next)))
}

/// Maps an ACL name to the filter enforcing it and the scope it belongs to.
pub type AclResolver = Arc<dyn Fn(&str) -> Result<(RouteFilter, String), String> + Send + Sync>;

type Endpoint = Arc<dyn Fn(Request<Body>, Arc<ParamCodec>, usize) -> BoxFuture<'static, Response> + Send + Sync>;

/// Settings shared by every route of a service.
#[derive(Clone)]
pub struct ServiceOptions {
    pub prefix_path: String,
    pub filter: Option<RouteFilter>,
    pub filters: Vec<RouteFilter>,
    pub acl: Option<AclResolver>,
    /// Applied to routes that declare no tags of their own.
    pub tags: Vec<String>,
    pub body_limit: usize,
    pub codec: Arc<ParamCodec>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            prefix_path: String::new(),
            filter: None,
            filters: Vec::new(),
            acl: None,
            tags: Vec::new(),
            body_limit: DEFAULT_BODY_LIMIT,
            codec: Arc::new(ParamCodec::new()),
        }
    }
}

pub struct Route {
    method: String,
    sub_path: String,
    acl: Option<String>,
    desc: String,
    tags: Vec<String>,
    filters: Vec<RouteFilter>,
    endpoint: Endpoint,
}

impl Route {
    pub fn new<H, M>(method: &str, sub_path: &str, handler: H) -> Self
    where
        H: Handler<M>,
        M: 'static,
    {
        let endpoint: Endpoint = Arc::new(move |req, codec, limit| {
            Box::pin(dispatch(handler.clone(), req, codec, limit))
        });
        Self {
            method: method.to_string(),
            sub_path: sub_path.to_string(),
            acl: None,
            desc: String::new(),
            tags: Vec::new(),
            filters: Vec::new(),
            endpoint,
        }
    }

    pub fn get<H: Handler<M>, M: 'static>(sub_path: &str, handler: H) -> Self {
        Self::new("GET", sub_path, handler)
    }

    pub fn post<H: Handler<M>, M: 'static>(sub_path: &str, handler: H) -> Self {
        Self::new("POST", sub_path, handler)
    }

    pub fn put<H: Handler<M>, M: 'static>(sub_path: &str, handler: H) -> Self {
        Self::new("PUT", sub_path, handler)
    }

    pub fn delete<H: Handler<M>, M: 'static>(sub_path: &str, handler: H) -> Self {
        Self::new("DELETE", sub_path, handler)
    }

    pub fn acl(mut self, acl: &str) -> Self {
        self.acl = Some(acl.to_string());
        self
    }

    pub fn desc(mut self, desc: &str) -> Self {
        self.desc = desc.to_string();
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn filter(mut self, filter: RouteFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("sub_path", &self.sub_path)
            .field("acl", &self.acl)
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// Maps the method aliases LIST, CREATE and UPDATE, case-insensitively.
pub fn normalize_method(method: &str) -> Option<Method> {
    match method.to_ascii_uppercase().as_str() {
        "GET" | "LIST" => Some(Method::GET),
        "POST" | "CREATE" => Some(Method::POST),
        "PUT" | "UPDATE" => Some(Method::PUT),
        "DELETE" => Some(Method::DELETE),
        _ => None,
    }
}

fn method_filter(method: &Method) -> MethodFilter {
    match *method {
        Method::POST => MethodFilter::POST,
        Method::PUT => MethodFilter::PUT,
        Method::DELETE => MethodFilter::DELETE,
        _ => MethodFilter::GET,
    }
}

/// Joins path pieces with exactly one `/` between them.
pub fn join_path(parts: &[&str]) -> String {
    let joined: Vec<&str> = parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", joined.join("/"))
}

async fn run_filter(State(filter): State<RouteFilter>, req: Request<Body>, next: Next) -> Response {
    filter(req, next).await
}

struct RouteLabels {
    verb: Method,
    path: String,
}

async fn instrumented(
    labels: Arc<RouteLabels>,
    endpoint: Endpoint,
    req: Request<Body>,
    codec: Arc<ParamCodec>,
    limit: usize,
) -> Response {
    let started = Instant::now();
    let response = endpoint(req, codec, limit).await;
    record_request(
        labels.verb.as_str(),
        &labels.path,
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

/// A group of routes under one root path.
#[derive(Debug)]
pub struct WebService {
    root: String,
    routes: Vec<Route>,
}

impl WebService {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            routes: Vec::new(),
        }
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn build(self, opts: &ServiceOptions, scopes: &mut ScopeRegistry) -> Result<Router, RouteError> {
        let mut router = Router::new();
        let mut seen = HashSet::new();
        let mut by_path: Vec<(String, MethodRouter)> = Vec::new();

        for route in self.routes {
            let path = join_path(&[&opts.prefix_path, &self.root, &route.sub_path]);
            let method = normalize_method(&route.method).ok_or_else(|| RouteError::UnsupportedMethod {
                method: route.method.clone(),
                path: path.clone(),
            })?;
            if !seen.insert((method.clone(), path.clone())) {
                return Err(RouteError::Duplicate {
                    method: method.to_string(),
                    path,
                });
            }

            let mut filters: Vec<RouteFilter> = Vec::new();
            filters.extend(opts.filter.iter().cloned());
            filters.extend(opts.filters.iter().cloned());

            let mut desc = route.desc.clone();
            if let Some(acl) = &route.acl {
                let resolver = opts.acl.as_ref().ok_or_else(|| RouteError::NoAclResolver {
                    acl: acl.clone(),
                    path: path.clone(),
                })?;
                let (filter, scope) = resolver(acl).map_err(|message| RouteError::Acl {
                    acl: acl.clone(),
                    message,
                })?;
                scopes.register(&scope, &route.desc)?;
                filters.push(filter);
                desc.push_str(&format!(" acl({}) scope({})", acl, scope));
            }
            filters.extend(route.filters.iter().cloned());

            let tags = if route.tags.is_empty() {
                opts.tags.clone()
            } else {
                route.tags.clone()
            };
            tracing::debug!(
                method = %method,
                path = %path,
                desc = %desc.trim(),
                tags = ?tags,
                filters = filters.len(),
                "Route registered"
            );

            let labels = Arc::new(RouteLabels {
                verb: method.clone(),
                path: path.clone(),
            });
            let endpoint = route.endpoint.clone();
            let codec = opts.codec.clone();
            let limit = opts.body_limit;
            let mut method_router = on(method_filter(&method), move |req: Request<Body>| {
                instrumented(labels.clone(), endpoint.clone(), req, codec.clone(), limit)
            });

            // The last layer added runs first.
            for filter in filters.into_iter().rev() {
                method_router = method_router.layer(middleware::from_fn_with_state(filter, run_filter));
            }

            match by_path.iter_mut().find(|(p, _)| *p == path) {
                Some((_, existing)) => {
                    let merged = std::mem::take(existing).merge(method_router);
                    *existing = merged;
                }
                None => by_path.push((path, method_router)),
            }
        }

        for (path, method_router) in by_path {
            router = router.route(&path, method_router);
        }
        Ok(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::rest::handler::RequestScope;
    use axum::http::{HeaderValue, StatusCode};
    use std::sync::Mutex;
    use tower::ServiceExt;

    async fn hello(_scope: RequestScope) -> Result<String, ApiError> {
        Ok("hello".to_string())
    }

    fn recording(order: Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> RouteFilter {
        route_filter(move |req: Request<Body>, next: Next| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(name);
                next.run(req).await
            }
        })
    }

    #[test]
    fn test_normalize_method() {
        assert_eq!(normalize_method("list"), Some(Method::GET));
        assert_eq!(normalize_method("Create"), Some(Method::POST));
        assert_eq!(normalize_method("UPDATE"), Some(Method::PUT));
        assert_eq!(normalize_method("delete"), Some(Method::DELETE));
        assert_eq!(normalize_method("PATCH"), None);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["/api/", "/v1", "users/{name}"]), "/api/v1/users/{name}");
        assert_eq!(join_path(&["", "/", ""]), "/");
    }

    #[test]
    fn test_unknown_method_rejected() {
        let ws = WebService::new("/x").route(Route::new("PATCH", "/", hello));
        let err = ws
            .build(&ServiceOptions::default(), &mut ScopeRegistry::new())
            .unwrap_err();
        assert!(matches!(err, RouteError::UnsupportedMethod { .. }));
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let ws = WebService::new("/x")
            .route(Route::get("/a", hello))
            .route(Route::new("list", "/a", hello));
        let err = ws
            .build(&ServiceOptions::default(), &mut ScopeRegistry::new())
            .unwrap_err();
        assert!(matches!(err, RouteError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_filter_order_and_acl_scope() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let acl_order = order.clone();
        let opts = ServiceOptions {
            prefix_path: "/api".into(),
            filter: Some(recording(order.clone(), "service-filter")),
            filters: vec![recording(order.clone(), "service-filters")],
            acl: Some(Arc::new(move |acl: &str| {
                Ok::<_, String>((recording(acl_order.clone(), "acl"), format!("scope-{}", acl)))
            })),
            ..Default::default()
        };
        let ws = WebService::new("/v1")
            .route(
                Route::get("/hello", hello)
                    .acl("read")
                    .desc("say hello")
                    .filter(recording(order.clone(), "route")),
            )
            .route(Route::post("/hello", hello));

        let mut registry = ScopeRegistry::new();
        let app = ws.build(&opts, &mut registry).unwrap();
        let scopes = registry.freeze();
        assert_eq!(scopes.description("scope-read"), Some("say hello"));

        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["service-filter", "service-filters", "acl", "route"]
        );

        let response = app
            .oneshot(Request::post("/api/v1/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_acl_without_resolver() {
        let ws = WebService::new("/x").route(Route::get("/", hello).acl("admin"));
        let err = ws
            .build(&ServiceOptions::default(), &mut ScopeRegistry::new())
            .unwrap_err();
        assert!(matches!(err, RouteError::NoAclResolver { .. }));
    }

    #[tokio::test]
    async fn test_filter_can_short_circuit() {
        let deny = route_filter(|_req: Request<Body>, _next: Next| async {
            let mut response = axum::response::IntoResponse::into_response(ApiError::forbidden("no"));
            response
                .headers_mut()
                .insert("x-filtered", HeaderValue::from_static("1"));
            response
        });
        let app = WebService::new("/x")
            .route(Route::get("/", hello).filter(deny))
            .build(&ServiceOptions::default(), &mut ScopeRegistry::new())
            .unwrap();
        let response = app
            .oneshot(Request::get("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()["x-filtered"], "1");
    }
}
