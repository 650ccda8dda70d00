//! Persists every turn, whatever happened before it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use careercoach_core::domain::intent::Intent;
use careercoach_core::domain::payload::PersistenceReceipt;
use careercoach_core::domain::profile::{TurnId, TurnRecord, TurnSummary};
use careercoach_core::{
    Capability, CapabilityError, CapabilityKind, Context, ContextField, ContextPatch, FanOut,
};
use careercoach_db::repositories::{ProfileRepository, TurnRepository};

pub struct MemoryCapability {
    profiles: Arc<dyn ProfileRepository>,
    turns: Arc<dyn TurnRepository>,
}

impl MemoryCapability {
    pub fn new(profiles: Arc<dyn ProfileRepository>, turns: Arc<dyn TurnRepository>) -> Self {
        Self { profiles, turns }
    }
}

#[async_trait]
impl Capability for MemoryCapability {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Memory
    }

    fn consumes(&self) -> &'static [ContextField] {
        &[
            ContextField::RequestText,
            ContextField::UserId,
            ContextField::SessionId,
            ContextField::Intent,
            ContextField::ResumeAnalysis,
            ContextField::InterviewExchange,
            ContextField::JobResults,
            ContextField::KnowledgeAnswer,
            ContextField::Errors,
        ]
    }

    fn produces(&self) -> &'static [ContextField] {
        &[ContextField::History, ContextField::PersistenceReceipt]
    }

    async fn run(&self, context: &Context, _fan_out: &FanOut<'_>) -> Result<ContextPatch, CapabilityError> {
        let now = Utc::now();
        self.profiles
            .ensure_exists(context.user_id(), now)
            .await
            .map_err(|error| CapabilityError::Persistence(error.to_string()))?;

        let intent = context.intent().map_or(Intent::Unknown, |decision| decision.intent);
        let record = TurnRecord {
            id: TurnId(Uuid::new_v4().to_string()),
            user_id: context.user_id().clone(),
            session_id: context.session_id().clone(),
            message: context.request_text().to_string(),
            response: None,
            intent,
            capability: Some(CapabilityKind::for_intent(intent).as_str().to_string()),
            metadata_json: turn_metadata(context),
            created_at: now,
        };
        let summary = TurnSummary::from(&record);
        let receipt = PersistenceReceipt {
            turn_id: record.id.0.clone(),
            persisted_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        self.turns
            .append(record)
            .await
            .map_err(|error| CapabilityError::Persistence(error.to_string()))?;
        tracing::debug!(
            event_name = "capability.memory.persisted",
            correlation_id = context.correlation_id(),
            turn_id = %receipt.turn_id,
        );

        Ok(ContextPatch { history_append: Some(summary), persistence: Some(receipt), ..ContextPatch::default() })
    }
}

/// Structured record of what the turn produced, stored alongside the message.
fn turn_metadata(context: &Context) -> Value {
    let decision = context.intent();
    let errors: Vec<Value> = context
        .errors()
        .iter()
        .map(|error| json!({ "source": error.source, "class": error.class.as_str(), "message": error.message }))
        .collect();

    let mut payload = serde_json::Map::new();
    if let Some(analysis) = context.resume_analysis() {
        payload.insert(
            "resume".to_string(),
            json!({ "overall_score": analysis.overall_score, "missing_keywords": analysis.keyword_analysis.missing.len() }),
        );
    }
    if let Some(exchange) = context.interview() {
        payload.insert(
            "interview".to_string(),
            json!({
                "session_id": exchange.session_id.0,
                "status": exchange.status.as_str(),
                "question_number": exchange.question_number,
                "score": exchange.answered.as_ref().map(|record| record.feedback.overall_score),
            }),
        );
    }
    if let Some(results) = context.job_results() {
        payload.insert(
            "jobs".to_string(),
            json!({
                "listings": results.listings.len(),
                "tracked_applications": results.tracked_applications.len(),
                "location": results.location,
            }),
        );
    }
    if let Some(answer) = context.knowledge() {
        payload.insert(
            "knowledge".to_string(),
            json!({ "sources": answer.sources, "confidence": answer.confidence }),
        );
    }

    json!({
        "correlation_id": context.correlation_id(),
        "label": decision.map(|decision| decision.label.as_str()),
        "confidence": decision.map(|decision| decision.confidence),
        "clarification_required": context.clarification_required(),
        "errors": errors,
        "payload": payload,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use careercoach_core::context::TurnAttachments;
    use careercoach_core::domain::intent::{Intent, IntentLabel};
    use careercoach_core::domain::profile::UserId;
    use careercoach_core::domain::session::SessionId;
    use careercoach_core::{Capability, CapabilityKind, CapabilityRegistry, ErrorClass, FanOut};
    use careercoach_db::repositories::{
        InMemoryProfileRepository, InMemoryTurnRepository, ProfileRepository, TurnRepository,
    };

    use super::MemoryCapability;
    use crate::capabilities::testing::{context, routed};

    #[tokio::test]
    async fn persists_turn_with_intent_errors_and_receipt() {
        let profiles = Arc::new(InMemoryProfileRepository::default());
        let turns = Arc::new(InMemoryTurnRepository::default());
        let memory = MemoryCapability::new(profiles.clone(), turns.clone());
        let registry = CapabilityRegistry::new();
        let fan_out = FanOut::top_level(&registry, CapabilityKind::Memory);

        let mut context = routed("Review my resume", TurnAttachments::default(), IntentLabel::ResumeAnalysis);
        context.record_error("resume", ErrorClass::CapabilityFailure, "missing required input: resume_text");

        let patch = memory.run(&context, &fan_out).await.expect("persisted");
        let receipt = patch.persistence.expect("receipt");
        assert_eq!(patch.history_append.map(|summary| summary.intent), Some(Intent::Resume));

        let stored = turns.recent_for_session(&SessionId("session-1".to_string()), 5).await.expect("turns");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id.0, receipt.turn_id);
        assert_eq!(stored[0].capability.as_deref(), Some("resume"));
        assert_eq!(stored[0].metadata_json["label"], "resume_analysis");
        assert_eq!(stored[0].metadata_json["errors"][0]["class"], "capability_failure");
        assert!(profiles.find(&UserId("user-1".to_string())).await.expect("profile").is_some());
    }

    #[tokio::test]
    async fn unrouted_context_is_stored_as_unknown_knowledge_turn() {
        let turns = Arc::new(InMemoryTurnRepository::default());
        let memory = MemoryCapability::new(Arc::new(InMemoryProfileRepository::default()), turns.clone());
        let registry = CapabilityRegistry::new();
        let fan_out = FanOut::top_level(&registry, CapabilityKind::Memory);

        memory.run(&context("hello", TurnAttachments::default()), &fan_out).await.expect("persisted");

        let stored = turns.recent_for_session(&SessionId("session-1".to_string()), 5).await.expect("turns");
        assert_eq!(stored[0].intent, Intent::Unknown);
        assert_eq!(stored[0].capability.as_deref(), Some("knowledge"));
    }
}
