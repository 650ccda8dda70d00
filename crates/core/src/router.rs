//! Intent routing: turns classifier candidates into exactly one decision.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::RouterConfig;
use crate::context::{Context, ContextWriteError};
use crate::domain::intent::{clamp_confidence, Intent, IntentDecision, IntentLabel, IntentScore};
use crate::domain::profile::TurnSummary;

/// Phrases that end an in-progress flow instead of continuing it.
pub const SWITCH_SIGNALS: [&str; 11] = [
    "search for job",
    "find job",
    "review my resume",
    "analyze my resume",
    "career advice",
    "help me with",
    "i want to",
    "switch to",
    "stop interview",
    "end session",
    "start new",
];

/// Evaluation order used when two candidates carry the same score.
const LABEL_PRIORITY: [IntentLabel; 9] = [
    IntentLabel::InterviewAnswer,
    IntentLabel::ResumeImprovement,
    IntentLabel::ResumeAnalysis,
    IntentLabel::InterviewStart,
    IntentLabel::InterviewPractice,
    IntentLabel::JobSearch,
    IntentLabel::CareerAdvice,
    IntentLabel::ApplicationTracking,
    IntentLabel::Unknown,
];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("classification backend unavailable: {0}")]
    Backend(String),
    #[error("classifier output could not be parsed: {0}")]
    Unparsable(String),
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn score(
        &self,
        request_text: &str,
        recent_history: &[TurnSummary],
    ) -> Result<Vec<IntentScore>, RouterError>;
}

#[derive(Clone)]
pub struct IntentRouter {
    classifier: Arc<dyn IntentClassifier>,
    config: RouterConfig,
}

impl IntentRouter {
    pub fn new(classifier: Arc<dyn IntentClassifier>, config: RouterConfig) -> Self {
        Self { classifier, config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Classifies one utterance. Never fails: backend errors become
    /// `unknown` at zero confidence.
    pub async fn classify(
        &self,
        request_text: &str,
        recent_history: &[TurnSummary],
        active_flow: Option<Intent>,
    ) -> IntentDecision {
        let mut candidates = match self.classifier.score(request_text, recent_history).await {
            Ok(candidates) => candidates,
            Err(error) => return IntentDecision::unknown(0.0, error.to_string()),
        };

        if active_flow == Some(Intent::Interview) && !has_switch_signal(request_text) {
            candidates.push(IntentScore::new(
                IntentLabel::InterviewAnswer,
                self.config.continuation_confidence,
                "continuation of the active interview session",
            ));
        }

        self.decide(candidates, active_flow)
    }

    /// Classifies the Context's request and writes the decision into it.
    pub async fn route(&self, context: &mut Context) -> Result<IntentDecision, ContextWriteError> {
        let decision = self
            .classify(
                context.request_text(),
                context.recent_history(self.config.history_window),
                context.active_flow(),
            )
            .await;
        context.set_intent(decision.clone())?;
        Ok(decision)
    }

    fn decide(&self, candidates: Vec<IntentScore>, active_flow: Option<Intent>) -> IntentDecision {
        let mut candidates: Vec<IntentScore> = candidates
            .into_iter()
            .map(|candidate| IntentScore {
                confidence: clamp_confidence(candidate.confidence),
                ..candidate
            })
            .collect();
        candidates.sort_by(|left, right| {
            right
                .confidence
                .total_cmp(&left.confidence)
                .then_with(|| priority(left.label).cmp(&priority(right.label)))
        });

        let Some(top) = candidates.first() else {
            return IntentDecision::unknown(0.0, "classifier returned no candidates");
        };

        let chosen = active_flow
            .and_then(|flow| {
                candidates.iter().find(|candidate| {
                    candidate.label.intent() == flow
                        && candidate.confidence >= self.config.confidence_threshold
                        && top.confidence - candidate.confidence <= self.config.tie_margin
                })
            })
            .unwrap_or(top);

        let rationale = format!("{} ({})", chosen.label.as_str(), chosen.reason);
        if chosen.label == IntentLabel::Unknown
            || chosen.confidence < self.config.confidence_threshold
        {
            return IntentDecision::unknown(chosen.confidence, rationale);
        }

        IntentDecision {
            intent: chosen.label.intent(),
            label: chosen.label,
            confidence: chosen.confidence,
            rationale,
            clarification_required: false,
        }
    }
}

pub fn has_switch_signal(request_text: &str) -> bool {
    let lowered = request_text.to_lowercase();
    SWITCH_SIGNALS.iter().any(|signal| lowered.contains(signal))
}

fn priority(label: IntentLabel) -> usize {
    LABEL_PRIORITY.iter().position(|candidate| *candidate == label).unwrap_or(LABEL_PRIORITY.len())
}
