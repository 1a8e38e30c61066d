//! Long-running request classification.
//!
//! The classifier runs once, in the request-info stage, and the verdict is
//! stored in the context. Later stages read the stored verdict instead of
//! re-evaluating the predicate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::http::request::Parts;

use crate::request::context::{ContextKey, RequestContext};
use crate::request::info::RequestInfo;

/// Predicate deciding whether a request is exempt from fixed timeouts.
pub type LongRunningCheck = Arc<dyn Fn(&Parts, &RequestInfo) -> bool + Send + Sync>;

/// Long-running when the verb or the resource subresource is in the given sets.
pub fn basic_long_running_check<V, S>(verbs: V, subresources: S) -> LongRunningCheck
where
    V: IntoIterator,
    V::Item: Into<String>,
    S: IntoIterator,
    S::Item: Into<String>,
{
    let verbs: HashSet<String> = verbs.into_iter().map(Into::into).collect();
    let subresources: HashSet<String> = subresources.into_iter().map(Into::into).collect();
    Arc::new(move |_parts, info| {
        if verbs.contains(&info.verb) {
            return true;
        }
        info.is_resource_request && subresources.contains(&info.subresource)
    })
}

/// `watch` requests only.
pub fn default_long_running_check() -> LongRunningCheck {
    basic_long_running_check(["watch"], std::iter::empty::<String>())
}

/// Verdict computed by the request-info stage.
pub struct LongRunningKey;
impl ContextKey for LongRunningKey {
    type Value = bool;
}

/// Server-side lifetime budget handed to long-running handlers.
pub struct LongRunningTimeoutKey;
impl ContextKey for LongRunningTimeoutKey {
    type Value = Duration;
}

pub fn is_long_running(ctx: &RequestContext) -> bool {
    ctx.get::<LongRunningKey>().unwrap_or(false)
}

pub fn long_running_timeout_from(ctx: &RequestContext) -> Option<Duration> {
    ctx.get::<LongRunningTimeoutKey>()
}

/// Uniform in `[min, 2 * min)`, so watches started together do not expire together.
pub fn jittered_timeout(min: Duration) -> Duration {
    if min.is_zero() {
        return min;
    }
    let spread = min.as_millis().min(u64::MAX as u128) as u64;
    min + Duration::from_millis(fastrand::u64(0..spread.max(1)))
}
