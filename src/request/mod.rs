//! Request metadata subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → context.rs   (typed, append-only value chain in Extensions)
//!     → info.rs      (verb/resource/namespace/name from method + path)
//!     → long_running.rs (verdict computed once, stored in the context)
//! ```
//!
//! # Design Decisions
//! - Everything a later stage needs travels in the context, never in globals
//! - Missing RequestInfo is a wiring bug and surfaces as a 500 downstream

pub mod context;
pub mod info;
pub mod long_running;

pub use context::RequestContext;
pub use info::{RequestInfo, RequestInfoFactory, RequestInfoResolver};
pub use long_running::{basic_long_running_check, default_long_running_check, LongRunningCheck};
