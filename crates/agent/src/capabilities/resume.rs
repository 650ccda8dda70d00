//! Resume analysis and improvement.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use careercoach_core::domain::intent::IntentLabel;
use careercoach_core::domain::payload::{KeywordAnalysis, ResumeAnalysis};
use careercoach_core::{
    Capability, CapabilityError, CapabilityKind, Context, ContextField, ContextPatch, FanOut,
};

use super::{request_mentions, routed_label};
use crate::llm::{parse_llm_json, truncate, LlmClient};
use crate::retrieval::terms;

const KEYWORD_LIMIT: usize = 15;
const RESUME_PROMPT_CHARS: usize = 6_000;

pub struct ResumeCapability {
    llm: Arc<dyn LlmClient>,
}

impl ResumeCapability {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn wants_rewrite(context: &Context) -> bool {
        routed_label(context) == IntentLabel::ResumeImprovement
            || request_mentions(context, &["improve", "rewrite", "audit"])
    }

    fn prompt(context: &Context, resume_text: &str, rewrite: bool) -> String {
        let job_description = context
            .attachments()
            .job_description
            .as_deref()
            .map(|text| format!("Target job description:\n{}\n", truncate(text, 3_000)))
            .unwrap_or_default();
        let rewrite_clause = if rewrite {
            ", \"improved_bullets\": [{\"original\": \"...\", \"improved\": \"...\", \"reasoning\": \"...\"}]"
        } else {
            ""
        };

        format!(
            "You are reviewing a resume for a job seeker.\n\
             Request: {request}\n\
             {job_description}\
             Resume:\n{resume}\n\
             Score the resume from 0 to 10 and reply with JSON only: \
             {{\"overall_score\": 0, \"strengths\": [], \"weaknesses\": [], \"recommendations\": [], \
             \"ats_compatibility\": {{\"score\": 0, \"issues\": [], \"suggestions\": []}}, \
             \"section_feedback\": {{\"summary\": \"...\", \"experience\": \"...\", \"skills\": \"...\"}}\
             {rewrite_clause}}}",
            request = context.request_text(),
            resume = truncate(resume_text, RESUME_PROMPT_CHARS),
        )
    }
}

#[async_trait]
impl Capability for ResumeCapability {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Resume
    }

    fn consumes(&self) -> &'static [ContextField] {
        &[ContextField::RequestText, ContextField::Attachments, ContextField::Intent]
    }

    fn produces(&self) -> &'static [ContextField] {
        &[ContextField::ResumeAnalysis]
    }

    async fn run(&self, context: &Context, fan_out: &FanOut<'_>) -> Result<ContextPatch, CapabilityError> {
        let resume_text = context
            .attachments()
            .resume_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| CapabilityError::MissingInput("resume_text".to_string()))?;
        let rewrite = Self::wants_rewrite(context);

        let reply = self
            .llm
            .complete(&Self::prompt(context, resume_text, rewrite))
            .await
            .map_err(|error| CapabilityError::Backend(error.to_string()))?;
        let parsed: ResumeReply =
            parse_llm_json(&reply).map_err(|error| CapabilityError::Unparsable(error.to_string()))?;

        let mut analysis = parsed.into_analysis(rewrite);
        analysis.keyword_analysis =
            keyword_analysis(resume_text, context.attachments().job_description.as_deref());

        if !fan_out.is_nested() {
            match fan_out.consult(CapabilityKind::Knowledge, context).await {
                Ok(patch) => {
                    analysis.formatting_sources =
                        patch.knowledge.map(|answer| answer.sources).unwrap_or_default();
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "capability.fan_out.skipped",
                        caller = "resume",
                        callee = "knowledge",
                        correlation_id = context.correlation_id(),
                        error = %error,
                    );
                }
            }
        }

        tracing::info!(
            event_name = "capability.resume.analyzed",
            correlation_id = context.correlation_id(),
            overall_score = analysis.overall_score,
            rewrite,
        );
        Ok(ContextPatch { resume_analysis: Some(analysis), ..ContextPatch::default() })
    }
}

/// Job-description terms split by presence in the resume, in term order.
pub fn keyword_analysis(resume_text: &str, job_description: Option<&str>) -> KeywordAnalysis {
    let Some(job_description) = job_description else {
        return KeywordAnalysis::default();
    };
    let resume_terms = terms(resume_text);
    let (mut matched, mut missing): (Vec<String>, Vec<String>) = terms(job_description)
        .into_iter()
        .filter(|term| term.chars().count() >= 3)
        .partition(|term| resume_terms.contains(term));
    matched.truncate(KEYWORD_LIMIT);
    missing.truncate(KEYWORD_LIMIT);
    KeywordAnalysis { matched, missing }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AtsReply {
    Summary(String),
    Detailed {
        #[serde(default)]
        score: Option<f64>,
        #[serde(default)]
        issues: Vec<String>,
    },
}

impl AtsReply {
    fn render(self) -> String {
        match self {
            Self::Summary(text) => text,
            Self::Detailed { score, issues } => {
                let score = score.map_or_else(|| "n/a".to_string(), |score| format!("{score}/10"));
                if issues.is_empty() {
                    score
                } else {
                    format!("{score}: {}", issues.join("; "))
                }
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BulletReply {
    Plain(String),
    Rewritten {
        improved: String,
    },
}

#[derive(Deserialize)]
struct ResumeReply {
    #[serde(default)]
    overall_score: Option<f64>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    ats_compatibility: Option<AtsReply>,
    #[serde(default)]
    section_feedback: BTreeMap<String, Value>,
    #[serde(default)]
    improved_bullets: Vec<BulletReply>,
}

impl ResumeReply {
    fn into_analysis(self, rewrite: bool) -> ResumeAnalysis {
        let section_feedback = self
            .section_feedback
            .into_iter()
            .filter_map(|(section, feedback)| match feedback {
                Value::Null => None,
                Value::String(text) => Some((section, text)),
                other => Some((section, other.to_string())),
            })
            .collect();
        let improved_bullets = if rewrite {
            self.improved_bullets
                .into_iter()
                .map(|bullet| match bullet {
                    BulletReply::Plain(text) | BulletReply::Rewritten { improved: text } => text,
                })
                .filter(|text| !text.trim().is_empty())
                .collect()
        } else {
            Vec::new()
        };

        ResumeAnalysis {
            overall_score: self.overall_score.filter(|score| !score.is_nan()).unwrap_or(0.0).clamp(0.0, 10.0),
            strengths: self.strengths,
            weaknesses: self.weaknesses,
            recommendations: self.recommendations,
            ats_compatibility: self.ats_compatibility.map(AtsReply::render).unwrap_or_else(|| "n/a".to_string()),
            keyword_analysis: KeywordAnalysis::default(),
            section_feedback,
            improved_bullets,
            formatting_sources: Vec::new(),
        }
    }
}
