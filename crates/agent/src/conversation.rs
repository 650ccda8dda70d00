//! Intent classifiers plugged into the core router.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use careercoach_core::domain::intent::{IntentLabel, IntentScore};
use careercoach_core::domain::profile::TurnSummary;
use careercoach_core::router::{IntentClassifier, RouterError};

use crate::llm::{parse_llm_json, truncate, LlmClient};

/// Keyword table in priority order.
const KEYWORD_TABLE: [(IntentLabel, f64, &[&str]); 7] = [
    (
        IntentLabel::ResumeImprovement,
        0.85,
        &["improve my resume", "rewrite", "bullet points", "better resume"],
    ),
    (IntentLabel::ResumeAnalysis, 0.85, &["resume", "cv", "review my", "analyze my"]),
    (
        IntentLabel::InterviewStart,
        0.90,
        &["start interview", "begin interview", "new interview session"],
    ),
    (
        IntentLabel::InterviewPractice,
        0.85,
        &["interview", "practice", "mock interview", "prepare for interview"],
    ),
    (
        IntentLabel::JobSearch,
        0.85,
        &["job", "search", "find job", "opportunities", "openings", "hiring"],
    ),
    (
        IntentLabel::CareerAdvice,
        0.80,
        &["advice", "tips", "guide", "how to", "how do i", "negotiate", "salary"],
    ),
    (
        IntentLabel::ApplicationTracking,
        0.85,
        &["application", "track", "status", "applied", "follow up"],
    ),
];

const NO_MATCH_CONFIDENCE: f64 = 0.5;

/// Deterministic substring classifier. Emits one candidate per matching
/// label so the router can apply its tie-break.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn candidates(&self, request_text: &str) -> Vec<IntentScore> {
        let normalized_text = normalize_text(request_text);
        let candidates: Vec<IntentScore> = KEYWORD_TABLE
            .iter()
            .filter_map(|(label, confidence, keywords)| {
                keywords
                    .iter()
                    .find(|keyword| normalized_text.contains(*keyword))
                    .map(|keyword| IntentScore::new(*label, *confidence, format!("keyword `{keyword}`")))
            })
            .collect();

        if candidates.is_empty() {
            vec![IntentScore::new(IntentLabel::Unknown, NO_MATCH_CONFIDENCE, "no keyword matched")]
        } else {
            candidates
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn score(
        &self,
        request_text: &str,
        _recent_history: &[TurnSummary],
    ) -> Result<Vec<IntentScore>, RouterError> {
        Ok(self.candidates(request_text))
    }
}

#[derive(Deserialize)]
struct LlmVerdict {
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Asks the generation backend for a label. When a fallback classifier is
/// attached, backend and parse failures are answered by it instead.
pub struct LlmIntentClassifier {
    llm: Arc<dyn LlmClient>,
    fallback: Option<Arc<dyn IntentClassifier>>,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, fallback: None }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn IntentClassifier>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn prompt(request_text: &str, recent_history: &[TurnSummary]) -> String {
        let history = if recent_history.is_empty() {
            "(none)".to_string()
        } else {
            recent_history
                .iter()
                .map(|turn| format!("- [{}] {}", turn.intent.as_str(), truncate(&turn.request_text, 160)))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let labels = KEYWORD_TABLE
            .iter()
            .map(|(label, _, _)| label.as_str())
            .chain([IntentLabel::InterviewAnswer.as_str(), IntentLabel::Unknown.as_str()])
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Classify the user's message for a career coaching assistant.\n\
             Allowed intents: {labels}.\n\
             Recent turns:\n{history}\n\
             Message: {request_text}\n\
             Reply with JSON only: {{\"intent\": \"<label>\", \"confidence\": <0.0-1.0>, \"reasoning\": \"<short>\"}}"
        )
    }

    async fn classify_with_llm(
        &self,
        request_text: &str,
        recent_history: &[TurnSummary],
    ) -> Result<Vec<IntentScore>, RouterError> {
        let reply = self
            .llm
            .complete(&Self::prompt(request_text, recent_history))
            .await
            .map_err(|error| RouterError::Backend(error.to_string()))?;
        let verdict: LlmVerdict =
            parse_llm_json(&reply).map_err(|error| RouterError::Unparsable(error.to_string()))?;
        let label = IntentLabel::parse(&verdict.intent).ok_or_else(|| {
            RouterError::Unparsable(format!("unknown intent label `{}`", verdict.intent))
        })?;

        Ok(vec![IntentScore::new(
            label,
            verdict.confidence.unwrap_or(NO_MATCH_CONFIDENCE),
            verdict.reasoning.unwrap_or_else(|| "llm classification".to_string()),
        )])
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn score(
        &self,
        request_text: &str,
        recent_history: &[TurnSummary],
    ) -> Result<Vec<IntentScore>, RouterError> {
        match self.classify_with_llm(request_text, recent_history).await {
            Ok(candidates) => Ok(candidates),
            Err(error) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(
                        event_name = "router.classifier.fallback",
                        classifier = fallback.name(),
                        error = %error,
                    );
                    fallback.score(request_text, recent_history).await
                }
                None => Err(error),
            },
        }
    }
}

pub(crate) fn normalize_text(text: &str) -> String {
    text.to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use careercoach_core::domain::intent::IntentLabel;
    use careercoach_core::router::{IntentClassifier, RouterError};

    use super::{KeywordIntentClassifier, LlmIntentClassifier};
    use crate::llm::testing::ScriptedLlm;

    #[test]
    fn keyword_classifier_reports_every_matching_label() {
        let candidates = KeywordIntentClassifier::new()
            .candidates("Review my resume and find job openings in Berlin");

        let labels: Vec<IntentLabel> = candidates.iter().map(|candidate| candidate.label).collect();
        assert_eq!(labels, vec![IntentLabel::ResumeAnalysis, IntentLabel::JobSearch]);
        assert!(candidates.iter().all(|candidate| candidate.confidence == 0.85));
    }

    #[test]
    fn keyword_classifier_defaults_to_unknown() {
        let candidates = KeywordIntentClassifier::new().candidates("hello there");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].label, IntentLabel::Unknown);
        assert_eq!(candidates[0].confidence, 0.5);
    }

    #[test]
    fn interview_start_outscores_generic_practice() {
        let candidates = KeywordIntentClassifier::new().candidates("Start interview please");

        let start = candidates
            .iter()
            .find(|candidate| candidate.label == IntentLabel::InterviewStart)
            .expect("start matched");
        assert_eq!(start.confidence, 0.90);
    }

    #[tokio::test]
    async fn llm_classifier_parses_fenced_json_and_clamps_confidence() {
        let llm = Arc::new(ScriptedLlm::replying(
            "```json\n{\"intent\": \"job_search\", \"confidence\": 1.4, \"reasoning\": \"wants roles\"}\n```",
        ));
        let classifier = LlmIntentClassifier::new(llm.clone());

        let candidates = classifier.score("anything hiring near me?", &[]).await.expect("classified");

        assert_eq!(candidates[0].label, IntentLabel::JobSearch);
        assert_eq!(candidates[0].confidence, 1.0);
        assert!(llm.prompts()[0].contains("anything hiring near me?"));
    }

    #[tokio::test]
    async fn llm_failures_surface_or_fall_back() {
        let bare = LlmIntentClassifier::new(Arc::new(ScriptedLlm::failing()));
        assert!(matches!(bare.score("tips?", &[]).await, Err(RouterError::Backend(_))));

        let garbled = LlmIntentClassifier::new(Arc::new(ScriptedLlm::replying("{\"intent\": \"dance\"}")));
        assert!(matches!(garbled.score("tips?", &[]).await, Err(RouterError::Unparsable(_))));

        let with_fallback = LlmIntentClassifier::new(Arc::new(ScriptedLlm::failing()))
            .with_fallback(Arc::new(KeywordIntentClassifier::new()));
        let candidates = with_fallback.score("salary tips", &[]).await.expect("fallback");
        assert_eq!(candidates[0].label, IntentLabel::CareerAdvice);
    }
}
