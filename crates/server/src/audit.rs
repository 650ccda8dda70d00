use careercoach_core::audit::{AuditEvent, AuditOutcome, AuditSink};

/// Forwards audit events to the tracing subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let session_id = event.session_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        let user_id = event.user_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                event_name = %event.event_type,
                event_id = %event.event_id,
                category = ?event.category,
                actor = %event.actor,
                outcome = ?event.outcome,
                correlation_id = %event.correlation_id,
                session_id,
                user_id,
                metadata = %metadata,
                "audit"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => tracing::warn!(
                event_name = %event.event_type,
                event_id = %event.event_id,
                category = ?event.category,
                actor = %event.actor,
                outcome = ?event.outcome,
                correlation_id = %event.correlation_id,
                session_id,
                user_id,
                metadata = %metadata,
                "audit"
            ),
        }
    }
}
