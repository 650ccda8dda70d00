//! Retrieval-grounded career advice. Also the fallback node for `unknown`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use careercoach_core::domain::payload::{KnowledgeAnswer, KnowledgePassage};
use careercoach_core::{
    Capability, CapabilityError, CapabilityKind, Context, ContextField, ContextPatch, FanOut,
};

use super::round2;
use crate::llm::{parse_llm_json, truncate, LlmClient};
use crate::retrieval::KnowledgeSearch;

const DEFAULT_TOPICS: [&str; 3] = ["resume best practices", "interview preparation", "salary negotiation"];
const MAX_RELATED_TOPICS: usize = 5;
const STITCHED_PASSAGES: usize = 3;

pub struct KnowledgeCapability {
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn KnowledgeSearch>,
    top_k: usize,
}

impl KnowledgeCapability {
    pub fn new(llm: Arc<dyn LlmClient>, search: Arc<dyn KnowledgeSearch>, top_k: usize) -> Self {
        Self { llm, search, top_k }
    }

    fn prompt(query: &str, passages: &[KnowledgePassage], clarify: bool) -> String {
        let grounding = if passages.is_empty() {
            "(no reference material found)".to_string()
        } else {
            passages
                .iter()
                .map(|passage| format!("[{}] {}", passage.source_id, truncate(&passage.text, 800)))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let clarify_clause = if clarify {
            "The request is ambiguous: answer briefly and end with one clarifying question.\n"
        } else {
            ""
        };

        format!(
            "You are a career coach. Answer using the reference material where relevant.\n\
             {clarify_clause}\
             Reference material:\n{grounding}\n\
             Question: {query}\n\
             Reply with JSON only: {{\"answer\": \"...\", \"sources_used\": [\"<source id>\"], \
             \"confidence\": 0.0, \"related_topics\": [\"...\"]}}"
        )
    }
}

#[derive(Deserialize)]
struct KnowledgeReply {
    answer: String,
    #[serde(default)]
    sources_used: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    related_topics: Vec<String>,
}

#[async_trait]
impl Capability for KnowledgeCapability {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Knowledge
    }

    fn consumes(&self) -> &'static [ContextField] {
        &[ContextField::RequestText, ContextField::Intent]
    }

    fn produces(&self) -> &'static [ContextField] {
        &[ContextField::KnowledgeAnswer]
    }

    async fn run(&self, context: &Context, _fan_out: &FanOut<'_>) -> Result<ContextPatch, CapabilityError> {
        let query = context.request_text().trim();
        if query.is_empty() {
            return Err(CapabilityError::MissingInput("request_text".to_string()));
        }

        let passages = self
            .search
            .search(query, self.top_k)
            .await
            .map_err(|error| CapabilityError::Backend(format!("knowledge search failed: {error}")))?;

        let prompt = Self::prompt(query, &passages, context.clarification_required());
        let reply = match self.llm.complete(&prompt).await {
            Ok(text) => parse_llm_json::<KnowledgeReply>(&text).map_err(|error| error.to_string()),
            Err(error) => Err(error.to_string()),
        };

        let answer = match reply {
            Ok(reply) => grounded_answer(query, reply, passages),
            Err(error) => {
                tracing::warn!(
                    event_name = "capability.knowledge.fallback",
                    correlation_id = context.correlation_id(),
                    passages = passages.len(),
                    error = %error,
                );
                stitched_answer(query, passages)
            }
        };

        Ok(ContextPatch { knowledge: Some(answer), ..ContextPatch::default() })
    }
}

fn grounded_answer(query: &str, reply: KnowledgeReply, passages: Vec<KnowledgePassage>) -> KnowledgeAnswer {
    let confidence = reply.confidence.filter(|value| !value.is_nan()).unwrap_or(0.5).clamp(0.0, 1.0);
    KnowledgeAnswer {
        query: query.to_string(),
        answer: reply.answer.trim().to_string(),
        sources: merge_sources(&passages, reply.sources_used),
        confidence: round2(confidence),
        related_topics: related_topics(reply.related_topics),
        passages,
    }
}

/// Answer assembled from the top passages when generation is unavailable.
fn stitched_answer(query: &str, passages: Vec<KnowledgePassage>) -> KnowledgeAnswer {
    let (answer, confidence) = if passages.is_empty() {
        (
            "I don't have specific guidance on that yet. Could you tell me a bit more about what you're working on?"
                .to_string(),
            0.1,
        )
    } else {
        let stitched = passages
            .iter()
            .take(STITCHED_PASSAGES)
            .map(|passage| passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        (format!("Here is what I found:\n\n{stitched}"), 0.4)
    };

    KnowledgeAnswer {
        query: query.to_string(),
        answer,
        sources: merge_sources(&passages, Vec::new()),
        confidence,
        related_topics: related_topics(Vec::new()),
        passages,
    }
}

/// Retrieved source ids first, then any extra ids the model cited.
/// Case-insensitive de-duplication.
fn merge_sources(passages: &[KnowledgePassage], cited: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for source in passages.iter().map(|passage| passage.source_id.clone()).chain(cited) {
        let source = source.trim().to_string();
        if !source.is_empty() && !merged.iter().any(|known| known.eq_ignore_ascii_case(&source)) {
            merged.push(source);
        }
    }
    merged
}

fn related_topics(topics: Vec<String>) -> Vec<String> {
    let mut topics: Vec<String> =
        topics.into_iter().map(|topic| topic.trim().to_string()).filter(|topic| !topic.is_empty()).collect();
    if topics.is_empty() {
        topics = DEFAULT_TOPICS.iter().map(|topic| topic.to_string()).collect();
    }
    topics.truncate(MAX_RELATED_TOPICS);
    topics
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use careercoach_core::context::TurnAttachments;
    use careercoach_core::domain::payload::KnowledgePassage;
    use careercoach_core::{Capability, CapabilityError, CapabilityKind, CapabilityRegistry, FanOut};

    use super::{merge_sources, KnowledgeCapability};
    use crate::capabilities::testing::context;
    use crate::llm::testing::ScriptedLlm;
    use crate::retrieval::{InMemoryKnowledgeIndex, KnowledgeSearch};

    struct BrokenIndex;

    #[async_trait]
    impl KnowledgeSearch for BrokenIndex {
        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<KnowledgePassage>> {
            Err(anyhow!("vector store offline"))
        }
    }

    fn passage(source_id: &str) -> KnowledgePassage {
        KnowledgePassage { text: "text".to_string(), source_id: source_id.to_string(), score: 0.5 }
    }

    #[tokio::test]
    async fn grounded_answer_merges_sources_and_caps_topics() {
        let llm = ScriptedLlm::replying(
            r#"{"answer": " Anchor high. ", "sources_used": ["SALARY_NEGOTIATION.md", "glassdoor"],
                "confidence": 0.876, "related_topics": ["a", "b", "c", "d", "e", "f"]}"#,
        );
        let capability = KnowledgeCapability::new(Arc::new(llm), Arc::new(InMemoryKnowledgeIndex::default()), 5);
        let registry = CapabilityRegistry::new();
        let fan_out = FanOut::top_level(&registry, CapabilityKind::Knowledge);

        let answer = capability
            .run(&context("How should I negotiate salary?", TurnAttachments::default()), &fan_out)
            .await
            .expect("answer")
            .knowledge
            .expect("payload");

        assert_eq!(answer.answer, "Anchor high.");
        assert_eq!(answer.sources[0], "salary_negotiation.md");
        assert_eq!(answer.sources.iter().filter(|source| source.eq_ignore_ascii_case("salary_negotiation.md")).count(), 1);
        assert!(answer.sources.contains(&"glassdoor".to_string()));
        assert_eq!(answer.confidence, 0.88);
        assert_eq!(answer.related_topics.len(), 5);
    }

    #[tokio::test]
    async fn generation_failure_falls_back_to_retrieved_passages() {
        let capability = KnowledgeCapability::new(
            Arc::new(ScriptedLlm::failing()),
            Arc::new(InMemoryKnowledgeIndex::default()),
            5,
        );
        let registry = CapabilityRegistry::new();
        let fan_out = FanOut::top_level(&registry, CapabilityKind::Knowledge);

        let found = capability
            .run(&context("STAR method for behavioral interview answers", TurnAttachments::default()), &fan_out)
            .await
            .expect("fallback")
            .knowledge
            .expect("payload");
        assert_eq!(found.confidence, 0.4);
        assert!(found.answer.starts_with("Here is what I found"));
        assert_eq!(found.related_topics.len(), 3);

        let nothing = capability
            .run(&context("zzz qqq", TurnAttachments::default()), &fan_out)
            .await
            .expect("fallback")
            .knowledge
            .expect("payload");
        assert_eq!(nothing.confidence, 0.1);
        assert!(nothing.sources.is_empty());
    }

    #[tokio::test]
    async fn search_failure_is_a_backend_error() {
        let capability = KnowledgeCapability::new(Arc::new(ScriptedLlm::failing()), Arc::new(BrokenIndex), 5);
        let registry = CapabilityRegistry::new();
        let fan_out = FanOut::top_level(&registry, CapabilityKind::Knowledge);

        let error = capability
            .run(&context("tips", TurnAttachments::default()), &fan_out)
            .await
            .expect_err("search failed");
        assert!(matches!(error, CapabilityError::Backend(message) if message.contains("offline")));
    }

    #[test]
    fn merge_sources_skips_blank_and_duplicate_ids() {
        let merged = merge_sources(&[passage("a.md"), passage("b.md")], vec![" A.md ".to_string(), String::new()]);
        assert_eq!(merged, vec!["a.md".to_string(), "b.md".to_string()]);
    }
}
