//! Kubernetes-style API server toolkit.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server   (trace, request id, body limit)
//!                      │
//!                      ▼
//!                     http::chain    (filters::* stages, outer to inner)
//!                      │   request context flows through every stage
//!                      ▼
//!                     rest::route    (per-route filters, route metrics)
//!                      │
//!                      ▼
//!                     rest::handler  (bind params + body → user handler → response)
//!
//!     Cross-cutting: config, observability, lifecycle (graceful shutdown),
//!                    authn, authz, audit
//!
//!     Outbound:      rest::client    (params encoded with the same codec)
//! ```

pub mod audit;
pub mod authn;
pub mod authz;
pub mod config;
pub mod demo;
pub mod error;
pub mod filters;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod request;
pub mod rest;

pub use config::schema::ServerConfig;
pub use error::ApiError;
pub use http::{build_handler_chain, ApiServer, ChainConfig};
pub use lifecycle::StopSignal;
pub use request::RequestContext;
