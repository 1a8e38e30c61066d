//! HTTP server assembly.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (TraceLayer, request id, body limit)
//!     → chain.rs  (filter stages, outer to inner)
//!     → rest      (route filters, handler adapter)
//! ```

pub mod chain;
pub mod server;

pub use chain::{build_handler_chain, ChainConfig};
pub use server::{ApiServer, ServerComponents};
