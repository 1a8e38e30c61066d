//! Per-filter latency tracking.
//!
//! `track_started` wraps a stage and stamps the shared [`FilterRecord`];
//! `track_completed` sits between the stage and its inner handler and
//! reports the time spent in the stage itself.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

use crate::observability::metrics;
use crate::request::context::{ContextKey, RequestContext};

/// Name and start instant of the stage currently being timed.
#[derive(Debug, Clone)]
pub struct FilterRecord {
    pub name: &'static str,
    pub started: Instant,
}

/// One cell per request, overwritten by each tracked stage.
pub type SharedFilterRecord = Arc<Mutex<FilterRecord>>;

pub struct FilterRecordKey;
impl ContextKey for FilterRecordKey {
    type Value = SharedFilterRecord;
}

/// Destination for filter latency observations.
pub trait FilterLatencyRecorder: Send + Sync {
    fn record(&self, filter: &str, elapsed: Duration);
}

/// Writes `apiserver_request_filter_duration_seconds{filter}`.
#[derive(Debug, Clone, Default)]
pub struct PrometheusRecorder;

impl FilterLatencyRecorder for PrometheusRecorder {
    fn record(&self, filter: &str, elapsed: Duration) {
        metrics::record_filter_latency(filter, elapsed);
    }
}

#[derive(Clone)]
pub struct TrackState {
    pub name: &'static str,
    pub recorder: Arc<dyn FilterLatencyRecorder>,
}

impl TrackState {
    pub fn new(name: &'static str, recorder: Arc<dyn FilterLatencyRecorder>) -> Self {
        Self { name, recorder }
    }
}

pub async fn track_started(
    State(state): State<TrackState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = RequestContext::of(&req);
    let record = FilterRecord {
        name: state.name,
        started: Instant::now(),
    };
    match ctx.value::<FilterRecordKey>() {
        Some(cell) => *cell.lock().unwrap_or_else(PoisonError::into_inner) = record,
        None => ctx
            .with::<FilterRecordKey>(Arc::new(Mutex::new(record)))
            .attach(&mut req),
    }
    next.run(req).await
}

pub async fn track_completed(
    State(state): State<TrackState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let completed = Instant::now();
    if let Some(cell) = RequestContext::of(&req).value::<FilterRecordKey>() {
        let record = cell.lock().unwrap_or_else(PoisonError::into_inner).clone();
        state
            .recorder
            .record(record.name, completed.saturating_duration_since(record.started));
    }
    next.run(req).await
}
