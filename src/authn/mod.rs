//! Authentication collaborators.
//!
//! # Data Flow
//! ```text
//! request parts
//!     → Authenticator::authenticate (token, anonymous, union)
//!     → Some(AuthResponse) | None | AuthError
//!     → filters::authentication attaches UserInfo to the context
//! ```
//!
//! # Design Decisions
//! - "No credentials recognised" (`Ok(None)`) is distinct from a hard error
//! - Authenticators see request parts only; the body is never read here
//! - Token tables live behind `ArcSwap` so config reloads are lock-free

pub mod authenticator;
pub mod token;
pub mod user;

pub use authenticator::{AnonymousAuthenticator, AuthError, AuthResponse, Authenticator, UnionAuthenticator};
pub use token::TokenAuthenticator;
pub use user::UserInfo;
