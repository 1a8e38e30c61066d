//! Handler chain stages.
//!
//! # Data Flow
//! ```text
//! (outer)
//! recovery.rs        panic → generic 500
//! timestamp.rs       ReceivedTimestamp, TraceId
//! headers.rs         HSTS, Cache-Control
//! request_info.rs    RequestInfo, long-running verdict
//! waitgroup.rs       in-flight tracking, 503 while draining
//! deadline.rs        ?timeout= → context deadline
//! timeout.rs         deadline enforcement → 504
//! cors.rs            origin allow-list
//! authentication.rs  user → context, 401 otherwise        (tracked)
//! audit.rs           audit event lifecycle                (tracked)
//! impersonation.rs   Impersonate-* → new user            (tracked)
//! authorization.rs   allow / 403 / 500                    (tracked)
//! (inner)            route handlers
//! ```
//!
//! # Design Decisions
//! - Every stage is an `axum::middleware` function or a tower-http layer
//! - Stages communicate only through the request context
//! - Composition order lives in one place: `http::chain`

pub mod audit;
pub mod authentication;
pub mod authorization;
pub mod cors;
pub mod deadline;
pub mod headers;
pub mod impersonation;
pub mod latency;
pub mod recovery;
pub mod request_info;
pub mod timeout;
pub mod timestamp;
pub mod waitgroup;

pub use latency::{FilterLatencyRecorder, FilterRecord, PrometheusRecorder};
