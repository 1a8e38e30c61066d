//! Audit events.
//!
//! # Data Flow
//! ```text
//! filters::audit creates AuditEvent (RequestReceived)
//!     → stored in RequestContext as a shared handle
//!     → authorization / handler adapter annotate it
//!     → filters::audit stamps ResponseComplete
//!     → AuditSink::process
//! ```
//!
//! # Design Decisions
//! - One shared event per request, written progressively by several stages
//! - Annotations are write-once per key; conflicting writes are logged and dropped
//! - Policy storage is external; a configured sink means "audit everything"

pub mod event;
pub mod sink;

pub use event::{
    add_annotation, lock_event, log_request_object, AuditEvent, SharedAuditEvent, Stage,
    DECISION_ALLOW, DECISION_ANNOTATION_KEY, DECISION_FORBID, REASON_ANNOTATION_KEY,
};
pub use sink::{AuditSink, LogSink};
