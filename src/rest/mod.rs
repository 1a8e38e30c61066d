//! REST layer: parameter binding, handler adaptation, routing and the client.
//!
//! # Data Flow
//! ```text
//! server:  Request → route filters → handler::dispatch
//!              → params (path/query/header) + negotiation (body)
//!              → user handler → response::HandlerOutput
//!
//! client:  RestClient → params encode → reqwest → negotiation decode
//! ```

pub mod client;
pub mod handler;
pub mod negotiation;
pub mod params;
pub mod response;
pub mod route;
pub mod scopes;

pub use client::{ClientError, Credentials, RestClient};
pub use handler::{Body, Handler, Param, RequestScope};
pub use params::{ParamCodec, ParamSchema, RequestBody, RequestParams, Validate, ValidationError};
pub use response::{error_response, ErrorAttribute, HandlerOutput};
pub use route::{route_filter, AclResolver, Route, RouteError, RouteFilter, ServiceOptions, WebService};
pub use scopes::{ScopeRegistry, Scopes};
