//! Authorization collaborators.
//!
//! # Data Flow
//! ```text
//! UserInfo + RequestInfo → Attributes
//!     → Authorizer::authorize (allow / deny / no-opinion, reason)
//!     → filters::authorization (continue, 403, or 500)
//! ```
//!
//! # Design Decisions
//! - Only an explicit Allow lets a request through; NoOpinion is a denial
//! - Reasons are human-readable and end up in the 403 message and audit log

pub mod authorizer;
pub mod policy;

pub use authorizer::{AlwaysAllow, AlwaysDeny, Attributes, AuthzError, Authorizer, Decision, UnionAuthorizer};
pub use policy::PolicyAuthorizer;
