//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → StopSignal::trigger (second signal exits)
//!
//! Shutdown (shutdown.rs):
//!     stop → shutdown delay → close listener → drain connections
//!          → stopped → wait-group drained → done
//!
//! In-flight tracking (waitgroup.rs):
//!     chain stage add() → guard dropped on response or unwind
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: keep serving, stop accept, drain, close
//! - Shutdown has timeout: connection draining is bounded
//! - Long-running requests are not counted by the wait-group

pub mod shutdown;
pub mod signals;
pub mod waitgroup;

pub use shutdown::{start, ShutdownError, ShutdownHandle, ShutdownOptions, StopSignal};
pub use signals::{shutdown_on_signal, shutdown_signal};
pub use waitgroup::{InFlightGuard, SafeWaitGroup, WaitGroupError};
