//! Audit event sinks.

use crate::audit::event::AuditEvent;

/// Receives finished audit events.
pub trait AuditSink: Send + Sync {
    fn process(&self, event: &AuditEvent);
}

/// Emits each event as a structured log line on the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl AuditSink for LogSink {
    fn process(&self, event: &AuditEvent) {
        let annotations = serde_json::to_string(&event.annotations).unwrap_or_default();
        tracing::info!(
            target: "audit",
            audit_id = %event.audit_id,
            stage = ?event.stage,
            verb = %event.verb,
            uri = %event.request_uri,
            user = %event.user.as_ref().map(|u| u.name.as_str()).unwrap_or(""),
            impersonated_user = %event.impersonated_user.as_ref().map(|u| u.name.as_str()).unwrap_or(""),
            code = event.response_code.unwrap_or_default(),
            annotations = %annotations,
            "Audit event"
        );
    }
}
