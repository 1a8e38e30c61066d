//! The per-request audit event and its annotation helpers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::authn::UserInfo;
use crate::request::context::{audit_event_from, RequestContext};

pub const DECISION_ANNOTATION_KEY: &str = "authorization.k8s.io/decision";
pub const REASON_ANNOTATION_KEY: &str = "authorization.k8s.io/reason";
pub const DECISION_ALLOW: &str = "allow";
pub const DECISION_FORBID: &str = "forbid";

/// Point in the request lifecycle an event was captured at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    RequestReceived,
    ResponseComplete,
    Panic,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub audit_id: String,
    pub stage: Stage,
    pub request_uri: String,
    pub verb: String,
    pub user: Option<UserInfo>,
    pub impersonated_user: Option<UserInfo>,
    pub user_agent: Option<String>,
    pub response_code: Option<u16>,
    pub response_message: Option<String>,
    pub request_object: Option<serde_json::Value>,
    pub annotations: BTreeMap<String, String>,
    /// Milliseconds since the Unix epoch.
    pub request_received_timestamp: u64,
    pub stage_timestamp: u64,
}

/// Handle shared by every stage that writes to the event.
pub type SharedAuditEvent = Arc<Mutex<AuditEvent>>;

impl AuditEvent {
    pub fn new(audit_id: impl Into<String>, verb: impl Into<String>, request_uri: impl Into<String>, received: SystemTime) -> Self {
        let received = unix_millis(received);
        Self {
            audit_id: audit_id.into(),
            stage: Stage::RequestReceived,
            request_uri: request_uri.into(),
            verb: verb.into(),
            user: None,
            impersonated_user: None,
            user_agent: None,
            response_code: None,
            response_message: None,
            request_object: None,
            annotations: BTreeMap::new(),
            request_received_timestamp: received,
            stage_timestamp: received,
        }
    }

    pub fn into_shared(self) -> SharedAuditEvent {
        Arc::new(Mutex::new(self))
    }

    /// Adds an annotation unless the key already holds a different value.
    pub fn annotate(&mut self, key: &str, value: &str) {
        match self.annotations.get(key) {
            Some(existing) if existing != value => {
                tracing::warn!(
                    audit_id = %self.audit_id,
                    key = %key,
                    existing = %existing,
                    rejected = %value,
                    "Audit annotation already set, keeping existing value"
                );
            }
            Some(_) => {}
            None => {
                self.annotations.insert(key.to_string(), value.to_string());
            }
        }
    }

    pub fn set_stage(&mut self, stage: Stage, at: SystemTime) {
        self.stage = stage;
        self.stage_timestamp = unix_millis(at);
    }
}

fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Locks an event, recovering the data if a writer panicked.
pub fn lock_event(event: &SharedAuditEvent) -> std::sync::MutexGuard<'_, AuditEvent> {
    event.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Annotates the request's audit event, if the request is being audited.
pub fn add_annotation(ctx: &RequestContext, key: &str, value: &str) {
    if let Some(event) = audit_event_from(ctx) {
        lock_event(&event).annotate(key, value);
    }
}

/// Records the decoded request object on the audit event.
pub fn log_request_object(ctx: &RequestContext, object: &serde_json::Value) {
    if let Some(event) = audit_event_from(ctx) {
        let mut event = lock_event(&event);
        match event.request_object.as_mut() {
            Some(serde_json::Value::Object(existing)) => {
                if let serde_json::Value::Object(more) = object {
                    existing.extend(more.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            _ => event.request_object = Some(object.clone()),
        }
    }
}
