//! Typed, append-only request context.
//!
//! # Responsibilities
//! - Carry cross-cutting values (identity, request info, audit event, ...) per request
//! - Produce a new child context on every write; parents are never mutated
//! - Carry the request deadline and expose it as a cancellation future
//!
//! # Data Flow
//! ```text
//! filters::timestamp  → RequestContext::new().with::<ReceivedTimestampKey>(..)
//!                     → attach(req)                      (stored in Extensions)
//! later stages        → RequestContext::of(&req).with::<K>(v).attach(&mut req)
//! handlers            → scope.context().value::<K>()
//! ```
//!
//! # Design Decisions
//! - Keys are zero-sized marker types, so two modules can never collide on a key
//! - The store is a persistent linked list: `with` is O(1), lookups walk to the root
//! - Values are behind `Arc`, so child contexts can cross task boundaries freely

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::http::Request;

use crate::audit::SharedAuditEvent;
use crate::authn::UserInfo;
use crate::request::info::RequestInfo;

/// A typed context key. The key type itself is never instantiated.
pub trait ContextKey: 'static {
    type Value: Clone + Send + Sync + 'static;
}

struct Entry {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Entry>>,
}

/// Immutable key/value chain scoped to one request.
#[derive(Clone, Default)]
pub struct RequestContext {
    head: Option<Arc<Entry>>,
    deadline: Option<tokio::time::Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child context with `value` bound to `K`. `self` is left untouched.
    pub fn with<K: ContextKey>(&self, value: K::Value) -> Self {
        Self {
            head: Some(Arc::new(Entry {
                key: TypeId::of::<K>(),
                value: Arc::new(value),
                parent: self.head.clone(),
            })),
            deadline: self.deadline,
        }
    }

    /// Most recently bound value for `K`.
    pub fn value<K: ContextKey>(&self) -> Option<&K::Value> {
        let wanted = TypeId::of::<K>();
        let mut cursor = self.head.as_deref();
        while let Some(entry) = cursor {
            if entry.key == wanted {
                return entry.value.downcast_ref::<K::Value>();
            }
            cursor = entry.parent.as_deref();
        }
        None
    }

    pub fn get<K: ContextKey>(&self) -> Option<K::Value> {
        self.value::<K>().cloned()
    }

    /// Child context that expires at `deadline`, or at the parent's deadline if that is earlier.
    pub fn with_deadline(&self, deadline: tokio::time::Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            head: self.head.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<tokio::time::Instant> {
        self.deadline
    }

    /// Resolves once the deadline passes. Never resolves without a deadline.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .map(|d| tokio::time::Instant::now() >= d)
            .unwrap_or(false)
    }

    /// Context carried by `req`, or an empty one.
    pub fn of<B>(req: &Request<B>) -> Self {
        req.extensions().get::<Self>().cloned().unwrap_or_default()
    }

    /// Installs this context on `req`, replacing the visible one.
    pub fn attach<B>(self, req: &mut Request<B>) {
        req.extensions_mut().insert(self);
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;
        let mut cursor = self.head.as_deref();
        while let Some(entry) = cursor {
            depth += 1;
            cursor = entry.parent.as_deref();
        }
        f.debug_struct("RequestContext")
            .field("values", &depth)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// When the server first saw the request.
#[derive(Debug, Clone, Copy)]
pub struct ReceivedTimestamp {
    pub instant: Instant,
    pub wall: SystemTime,
}

impl ReceivedTimestamp {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: SystemTime::now(),
        }
    }
}

/// Opaque session handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session(pub String);

/// Correlation id, taken from `x-request-id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId(pub String);

pub struct UserKey;
impl ContextKey for UserKey {
    type Value = UserInfo;
}

pub struct RequestInfoKey;
impl ContextKey for RequestInfoKey {
    type Value = Arc<RequestInfo>;
}

pub struct AuditEventKey;
impl ContextKey for AuditEventKey {
    type Value = SharedAuditEvent;
}

pub struct ReceivedTimestampKey;
impl ContextKey for ReceivedTimestampKey {
    type Value = ReceivedTimestamp;
}

pub struct SessionKey;
impl ContextKey for SessionKey {
    type Value = Session;
}

pub struct TraceIdKey;
impl ContextKey for TraceIdKey {
    type Value = TraceId;
}

pub struct ParamKey;
impl ContextKey for ParamKey {
    type Value = Arc<serde_json::Value>;
}

pub struct BodyKey;
impl ContextKey for BodyKey {
    type Value = Arc<serde_json::Value>;
}

pub fn with_user(parent: &RequestContext, user: UserInfo) -> RequestContext {
    parent.with::<UserKey>(user)
}

pub fn user_from(ctx: &RequestContext) -> Option<UserInfo> {
    ctx.get::<UserKey>()
}

pub fn with_request_info(parent: &RequestContext, info: RequestInfo) -> RequestContext {
    parent.with::<RequestInfoKey>(Arc::new(info))
}

pub fn request_info_from(ctx: &RequestContext) -> Option<Arc<RequestInfo>> {
    ctx.get::<RequestInfoKey>()
}

pub fn with_audit_event(parent: &RequestContext, event: SharedAuditEvent) -> RequestContext {
    parent.with::<AuditEventKey>(event)
}

pub fn audit_event_from(ctx: &RequestContext) -> Option<SharedAuditEvent> {
    ctx.get::<AuditEventKey>()
}

pub fn with_received_timestamp(parent: &RequestContext, ts: ReceivedTimestamp) -> RequestContext {
    parent.with::<ReceivedTimestampKey>(ts)
}

pub fn received_timestamp_from(ctx: &RequestContext) -> Option<ReceivedTimestamp> {
    ctx.get::<ReceivedTimestampKey>()
}

pub fn with_session(parent: &RequestContext, session: Session) -> RequestContext {
    parent.with::<SessionKey>(session)
}

pub fn session_from(ctx: &RequestContext) -> Option<Session> {
    ctx.get::<SessionKey>()
}

pub fn with_trace_id(parent: &RequestContext, trace_id: TraceId) -> RequestContext {
    parent.with::<TraceIdKey>(trace_id)
}

pub fn trace_id_from(ctx: &RequestContext) -> Option<TraceId> {
    ctx.get::<TraceIdKey>()
}

pub fn with_param(parent: &RequestContext, param: serde_json::Value) -> RequestContext {
    parent.with::<ParamKey>(Arc::new(param))
}

pub fn param_from(ctx: &RequestContext) -> Option<Arc<serde_json::Value>> {
    ctx.get::<ParamKey>()
}

pub fn with_body(parent: &RequestContext, body: serde_json::Value) -> RequestContext {
    parent.with::<BodyKey>(Arc::new(body))
}

pub fn body_from(ctx: &RequestContext) -> Option<Arc<serde_json::Value>> {
    ctx.get::<BodyKey>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_missing_key_is_none() {
        let ctx = RequestContext::new();
        assert!(user_from(&ctx).is_none());
        assert!(request_info_from(&ctx).is_none());
    }

    #[test]
    fn test_with_never_mutates_parent() {
        let parent = with_user(&RequestContext::new(), UserInfo::new("alice"));
        let child = with_user(&parent, UserInfo::new("bob"));

        assert_eq!(user_from(&parent).unwrap().name, "alice");
        assert_eq!(user_from(&child).unwrap().name, "bob");
    }

    #[test]
    fn test_sibling_contexts_are_independent() {
        let root = with_session(&RequestContext::new(), Session("s1".into()));
        let a = with_trace_id(&root, TraceId("a".into()));
        let b = with_trace_id(&root, TraceId("b".into()));

        assert_eq!(trace_id_from(&a).unwrap().0, "a");
        assert_eq!(trace_id_from(&b).unwrap().0, "b");
        assert!(trace_id_from(&root).is_none());
        assert_eq!(session_from(&a), session_from(&b));
    }

    #[test]
    fn test_keys_with_same_value_type_do_not_collide() {
        let ctx = with_param(&RequestContext::new(), serde_json::json!({"p": 1}));
        let ctx = with_body(&ctx, serde_json::json!({"b": 2}));
        assert_eq!(param_from(&ctx).unwrap()["p"], 1);
        assert_eq!(body_from(&ctx).unwrap()["b"], 2);
    }

    #[test]
    fn test_context_travels_in_extensions() {
        let mut req = Request::builder().uri("/").body(()).unwrap();
        assert!(user_from(&RequestContext::of(&req)).is_none());

        with_user(&RequestContext::of(&req), UserInfo::new("carol")).attach(&mut req);
        assert_eq!(user_from(&RequestContext::of(&req)).unwrap().name, "carol");
    }

    #[test]
    fn test_deadline_survives_with() {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let ctx = RequestContext::new().with_deadline(deadline);
        let child = with_user(&ctx, UserInfo::new("dave"));
        assert_eq!(child.deadline(), Some(deadline));
        assert!(RequestContext::new().deadline().is_none());
    }

    #[test]
    fn test_deadline_never_extends_parent() {
        let now = tokio::time::Instant::now();
        let parent = RequestContext::new().with_deadline(now + Duration::from_secs(1));
        let later = parent.with_deadline(now + Duration::from_secs(60));
        assert_eq!(later.deadline(), Some(now + Duration::from_secs(1)));

        let earlier = parent.with_deadline(now + Duration::from_millis(10));
        assert_eq!(earlier.deadline(), Some(now + Duration::from_millis(10)));
        assert_eq!(parent.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_done_fires_at_deadline() {
        let ctx = RequestContext::new()
            .with_deadline(tokio::time::Instant::now() + Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(1), ctx.done())
            .await
            .expect("deadline should fire");
        assert!(ctx.is_expired());
    }

    #[tokio::test]
    async fn test_done_pending_without_deadline() {
        let ctx = RequestContext::new();
        let result = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_concurrent_readers() {
        let ctx = with_user(&RequestContext::new(), UserInfo::new("eve"));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    let child = with_trace_id(&ctx, TraceId(i.to_string()));
                    (user_from(&child).unwrap().name, trace_id_from(&child).unwrap().0)
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let (name, trace) = handle.join().unwrap();
            assert_eq!(name, "eve");
            assert_eq!(trace, i.to_string());
        }
    }
}
