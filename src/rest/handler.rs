//! Generic route handler adapter.
//!
//! # Responsibilities
//! - Accept async handlers of four shapes and call them uniformly
//! - Decode fresh parameter and body values for every request
//! - Record decoded values on the context and the audit event
//! - Turn the handler's output into a response
//!
//! # Data Flow
//! ```text
//! Request
//!     → Accept check            (406)
//!     → ParamCodec::decode      (400)
//!     → body read + decode_body (413 / 415 / 400)
//!     → with_param / with_body + audit request object
//!     → handler(scope, ..)
//!     → HandlerOutput::into_output
//! ```
//!
//! # Design Decisions
//! - Shapes are told apart by marker types, so dispatch is resolved at compile time
//! - `RequestScope` owns the request parts; handlers never see the raw body

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use axum::body::Body as AxumBody;
use axum::extract::rejection::PathRejection;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Method, Request, Uri};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::audit::log_request_object;
use crate::authn::UserInfo;
use crate::error::ApiError;
use crate::request::context::{self, RequestContext};
use crate::rest::negotiation::{check_acceptable, decode_body};
use crate::rest::params::{parse_query, ParamCodec, ParamSource, RequestBody, RequestParams};
use crate::rest::response::{error_response, HandlerOutput};

/// Everything a handler may know about its request, apart from bound values.
#[derive(Debug)]
pub struct RequestScope {
    parts: Parts,
    context: RequestContext,
    path_params: HashMap<String, String>,
}

impl RequestScope {
    pub fn new(parts: Parts, path_params: HashMap<String, String>) -> Self {
        let context = parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default();
        Self {
            parts,
            context,
            path_params,
        }
    }

    pub fn parts(&self) -> &Parts {
        &self.parts
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn user(&self) -> Option<UserInfo> {
        context::user_from(&self.context)
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    fn set_context(&mut self, ctx: RequestContext) {
        self.parts.extensions.insert(ctx.clone());
        self.context = ctx;
    }
}

/// Decoded path, query and header parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Param<P>(pub P);

/// Decoded request body.
#[derive(Debug, Clone, PartialEq)]
pub struct Body<B>(pub B);

/// One request on its way into a handler.
pub struct HandlerInput {
    scope: RequestScope,
    body: AxumBody,
    codec: Arc<ParamCodec>,
    body_limit: usize,
}

impl HandlerInput {
    pub fn new(
        scope: RequestScope,
        body: AxumBody,
        codec: Arc<ParamCodec>,
        body_limit: usize,
    ) -> Self {
        Self {
            scope,
            body,
            codec,
            body_limit,
        }
    }

    fn decode_params<P: RequestParams>(&self) -> Result<P, ApiError> {
        let query = parse_query(self.scope.uri().query());
        let source = ParamSource {
            path: &self.scope.path_params,
            query: &query,
            headers: self.scope.headers(),
        };
        Ok(self.codec.decode::<P>(&source)?)
    }

    async fn decode_body<B: RequestBody>(&mut self) -> Result<B, ApiError> {
        let declared = self
            .scope
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.body_limit) {
            return Err(ApiError::too_large(self.body_limit));
        }

        let body = std::mem::take(&mut self.body);
        let bytes = axum::body::to_bytes(body, self.body_limit)
            .await
            .map_err(|e| ApiError::bad_request(format!("unable to read request body: {}", e)))?;
        let value: B = decode_body(self.scope.headers(), &bytes)?;
        value.validate()?;
        Ok(value)
    }

    async fn bind<P: RequestParams, B: RequestBody>(
        &mut self,
        want_param: bool,
        want_body: bool,
    ) -> Result<(Option<P>, Option<B>), ApiError> {
        check_acceptable(self.scope.headers())?;

        let param = if want_param {
            Some(self.decode_params::<P>()?)
        } else {
            None
        };
        let body = if want_body {
            Some(self.decode_body::<B>().await?)
        } else {
            None
        };

        let mut ctx = self.scope.context.clone();
        if let Some(value) = param.as_ref().and_then(|p| serde_json::to_value(p).ok()) {
            ctx = context::with_param(&ctx, value);
        }
        if let Some(value) = body.as_ref().and_then(|b| serde_json::to_value(b).ok()) {
            log_request_object(&ctx, &value);
            ctx = context::with_body(&ctx, value);
        }
        self.scope.set_context(ctx);
        Ok((param, body))
    }
}

/// An async function usable as a route handler. `M` selects the shape.
pub trait Handler<M>: Clone + Send + Sync + 'static {
    fn call(self, input: HandlerInput) -> BoxFuture<'static, Response>;
}

#[doc(hidden)]
pub struct ScopeOnly<O>(PhantomData<fn() -> O>);
#[doc(hidden)]
pub struct WithParam<P, O>(PhantomData<fn() -> (P, O)>);
#[doc(hidden)]
pub struct WithBody<B, O>(PhantomData<fn() -> (B, O)>);
#[doc(hidden)]
pub struct WithParamAndBody<P, B, O>(PhantomData<fn() -> (P, B, O)>);

impl<F, Fut, O> Handler<ScopeOnly<O>> for F
where
    F: FnOnce(RequestScope) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: HandlerOutput,
{
    fn call(self, mut input: HandlerInput) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            if let Err(err) = input.bind::<(), ()>(false, false).await {
                return error_response(err);
            }
            self(input.scope).await.into_output()
        })
    }
}

impl<F, Fut, P, O> Handler<WithParam<P, O>> for F
where
    F: FnOnce(RequestScope, Param<P>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    P: RequestParams,
    O: HandlerOutput,
{
    fn call(self, mut input: HandlerInput) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            match input.bind::<P, ()>(true, false).await {
                Ok((Some(param), _)) => self(input.scope, Param(param)).await.into_output(),
                Ok(_) => error_response(ApiError::internal("parameters were not bound")),
                Err(err) => error_response(err),
            }
        })
    }
}

impl<F, Fut, B, O> Handler<WithBody<B, O>> for F
where
    F: FnOnce(RequestScope, Body<B>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    B: RequestBody,
    O: HandlerOutput,
{
    fn call(self, mut input: HandlerInput) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            match input.bind::<(), B>(false, true).await {
                Ok((_, Some(body))) => self(input.scope, Body(body)).await.into_output(),
                Ok(_) => error_response(ApiError::internal("request body was not bound")),
                Err(err) => error_response(err),
            }
        })
    }
}

impl<F, Fut, P, B, O> Handler<WithParamAndBody<P, B, O>> for F
where
    F: FnOnce(RequestScope, Param<P>, Body<B>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    P: RequestParams,
    B: RequestBody,
    O: HandlerOutput,
{
    fn call(self, mut input: HandlerInput) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            match input.bind::<P, B>(true, true).await {
                Ok((Some(param), Some(body))) => {
                    self(input.scope, Param(param), Body(body)).await.into_output()
                }
                Ok(_) => error_response(ApiError::internal("request was not fully bound")),
                Err(err) => error_response(err),
            }
        })
    }
}

/// Extract path variables from a routed request.
pub async fn path_params(parts: &mut Parts) -> Result<HashMap<String, String>, ApiError> {
    match Path::<HashMap<String, String>>::from_request_parts(parts, &()).await {
        Ok(Path(params)) => Ok(params),
        Err(PathRejection::MissingPathParams(_)) => Ok(HashMap::new()),
        Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
    }
}

/// Run `handler` for `req`.
pub async fn dispatch<H, M>(
    handler: H,
    req: Request<AxumBody>,
    codec: Arc<ParamCodec>,
    body_limit: usize,
) -> Response
where
    H: Handler<M>,
{
    let (mut parts, body) = req.into_parts();
    let params = match path_params(&mut parts).await {
        Ok(params) => params,
        Err(err) => return error_response(err),
    };
    let scope = RequestScope::new(parts, params);
    handler
        .call(HandlerInput::new(scope, body, codec, body_limit))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::params::{ParamSchema, Validate, ValidationError};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;
    use http_body_util::BodyExt;
    use serde::{Deserialize, Serialize};
    use tower::ServiceExt;

    #[derive(Debug, Serialize, Deserialize, Default)]
    #[serde(default)]
    struct UserParams {
        name: String,
        verbose: bool,
    }

    impl Validate for UserParams {}

    impl RequestParams for UserParams {
        fn describe() -> ParamSchema {
            ParamSchema::builder()
                .path("name")
                .query("verbose")
                .build()
        }
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
    struct User {
        name: String,
        age: u32,
    }

    impl Validate for User {
        fn validate(&self) -> Result<(), ValidationError> {
            if self.name.is_empty() {
                return Err(ValidationError::new("name must not be empty"));
            }
            Ok(())
        }
    }

    async fn get_user(_scope: RequestScope, Param(p): Param<UserParams>) -> Result<User, ApiError> {
        if p.name == "missing" {
            return Err(ApiError::not_found(format!("user {:?} not found", p.name)));
        }
        Ok(User {
            name: p.name,
            age: if p.verbose { 42 } else { 0 },
        })
    }

    async fn create_user(scope: RequestScope, Body(user): Body<User>) -> Result<User, ApiError> {
        assert!(context::body_from(scope.context()).is_some());
        Ok(user)
    }

    fn app() -> Router {
        let codec = Arc::new(ParamCodec::new());
        let c1 = codec.clone();
        Router::new()
            .route(
                "/users/{name}",
                get(move |req: Request<AxumBody>| dispatch(get_user, req, c1.clone(), 1024)),
            )
            .route(
                "/users",
                post(move |req: Request<AxumBody>| dispatch(create_user, req, codec.clone(), 64)),
            )
    }

    async fn send(req: Request<AxumBody>) -> (StatusCode, serde_json::Value) {
        let response = app().oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_get_user_by_name() {
        let req = Request::get("/users/alice?verbose=true")
            .body(AxumBody::empty())
            .unwrap();
        let (status, json) = send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"name": "alice", "age": 42}));
    }

    #[tokio::test]
    async fn test_handler_error_is_status_body() {
        let req = Request::get("/users/missing").body(AxumBody::empty()).unwrap();
        let (status, json) = send(req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["reason"], "NotFound");
    }

    #[tokio::test]
    async fn test_bad_query_value() {
        let req = Request::get("/users/alice?verbose=maybe")
            .body(AxumBody::empty())
            .unwrap();
        let (status, json) = send(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["message"].as_str().unwrap().contains("verbose"));
    }

    #[tokio::test]
    async fn test_not_acceptable() {
        let req = Request::get("/users/alice")
            .header(header::ACCEPT, "application/xml")
            .body(AxumBody::empty())
            .unwrap();
        let (status, _) = send(req).await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_body_decode_and_validate() {
        let req = Request::post("/users")
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(r#"{"name":"bob","age":7}"#))
            .unwrap();
        let (status, json) = send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "bob");

        let req = Request::post("/users")
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(r#"{"name":"","age":7}"#))
            .unwrap();
        let (status, json) = send(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "name must not be empty");
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let big = format!(r#"{{"name":"{}","age":1}}"#, "x".repeat(100));
        let req = Request::post("/users")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, big.len())
            .body(AxumBody::from(big))
            .unwrap();
        let (status, _) = send(req).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_unsupported_media_type() {
        let req = Request::post("/users")
            .header(header::CONTENT_TYPE, "application/xml")
            .body(AxumBody::from("<user/>"))
            .unwrap();
        let (status, _) = send(req).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
