//! The per-turn Context record and its single-writer patch rules.
//!
//! A [`Context`] is owned by exactly one traversal (or one background job).
//! Inputs are fixed at construction; every derived field has exactly one
//! [`Writer`] and may be written once per traversal through
//! [`Context::apply_patch`], [`Context::set_intent`] or
//! [`Context::set_response`]. `errors` is append-only.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::intent::{Intent, IntentDecision};
use crate::domain::payload::{
    InterviewExchange, JobSearchResult, KnowledgeAnswer, PersistenceReceipt, ResumeAnalysis,
};
use crate::domain::profile::{TurnSummary, UserId};
use crate::domain::session::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Resume,
    Interview,
    Jobs,
    Knowledge,
    Memory,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::Interview => "interview",
            Self::Jobs => "jobs",
            Self::Knowledge => "knowledge",
            Self::Memory => "memory",
        }
    }

    /// Capability selected for an intent. `Unknown` falls back to knowledge.
    pub fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::Resume => Self::Resume,
            Intent::Interview => Self::Interview,
            Intent::Jobs => Self::Jobs,
            Intent::Knowledge | Intent::Unknown => Self::Knowledge,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum Writer {
    Router,
    Capability(CapabilityKind),
    Responder,
}

impl Writer {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Capability(kind) => kind.as_str(),
            Self::Responder => "responder",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    RequestText,
    UserId,
    SessionId,
    Attachments,
    ActiveFlow,
    History,
    Intent,
    ResumeAnalysis,
    InterviewExchange,
    JobResults,
    KnowledgeAnswer,
    PersistenceReceipt,
    Errors,
    Response,
}

impl ContextField {
    /// The only writer allowed to set this field. `None` marks inputs fixed at
    /// construction and the append-only error log.
    pub fn owner(&self) -> Option<Writer> {
        match self {
            Self::RequestText
            | Self::UserId
            | Self::SessionId
            | Self::Attachments
            | Self::ActiveFlow
            | Self::Errors => None,
            Self::Intent => Some(Writer::Router),
            Self::ResumeAnalysis => Some(Writer::Capability(CapabilityKind::Resume)),
            Self::InterviewExchange => Some(Writer::Capability(CapabilityKind::Interview)),
            Self::JobResults => Some(Writer::Capability(CapabilityKind::Jobs)),
            Self::KnowledgeAnswer => Some(Writer::Capability(CapabilityKind::Knowledge)),
            Self::History | Self::PersistenceReceipt => {
                Some(Writer::Capability(CapabilityKind::Memory))
            }
            Self::Response => Some(Writer::Responder),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContextWriteError {
    #[error("{writer:?} does not own context field {field:?}")]
    NotOwner { field: ContextField, writer: Writer },
    #[error("context field {field:?} was already written by {previous:?} in this traversal")]
    AlreadyWritten { field: ContextField, previous: Writer },
}

/// Optional request material supplied alongside the utterance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnAttachments {
    pub resume_text: Option<String>,
    pub job_description: Option<String>,
    pub location: Option<String>,
    pub role: Option<String>,
    pub level: Option<String>,
    pub question_count: Option<usize>,
    pub remote_ok: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    pub request_text: String,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub attachments: TurnAttachments,
    pub correlation_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    CapabilityFailure,
    PersistenceFailure,
    Timeout,
    ContractViolation,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapabilityFailure => "capability_failure",
            Self::PersistenceFailure => "persistence_failure",
            Self::Timeout => "timeout",
            Self::ContractViolation => "contract_violation",
        }
    }
}

/// Machine-readable cause of a capability failure, for renderers that
/// react to specific failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorReason {
    MissingInput { field: String },
    Rejected { detail: String },
}

/// A recoverable failure recorded during a traversal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextError {
    pub source: String,
    pub class: ErrorClass,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorReason>,
    pub occurred_at: DateTime<Utc>,
}

/// Fields a single writer wants to set. Applied atomically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPatch {
    pub resume_analysis: Option<ResumeAnalysis>,
    pub interview: Option<InterviewExchange>,
    pub job_results: Option<JobSearchResult>,
    pub knowledge: Option<KnowledgeAnswer>,
    pub history_append: Option<TurnSummary>,
    pub persistence: Option<PersistenceReceipt>,
}

impl ContextPatch {
    pub fn fields(&self) -> Vec<ContextField> {
        let mut fields = Vec::new();
        if self.resume_analysis.is_some() {
            fields.push(ContextField::ResumeAnalysis);
        }
        if self.interview.is_some() {
            fields.push(ContextField::InterviewExchange);
        }
        if self.job_results.is_some() {
            fields.push(ContextField::JobResults);
        }
        if self.knowledge.is_some() {
            fields.push(ContextField::KnowledgeAnswer);
        }
        if self.history_append.is_some() {
            fields.push(ContextField::History);
        }
        if self.persistence.is_some() {
            fields.push(ContextField::PersistenceReceipt);
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Context {
    request_text: String,
    user_id: UserId,
    session_id: SessionId,
    attachments: TurnAttachments,
    correlation_id: String,
    active_flow: Option<Intent>,
    history: Vec<TurnSummary>,
    intent: Option<IntentDecision>,
    resume_analysis: Option<ResumeAnalysis>,
    interview: Option<InterviewExchange>,
    job_results: Option<JobSearchResult>,
    knowledge: Option<KnowledgeAnswer>,
    persistence: Option<PersistenceReceipt>,
    errors: Vec<ContextError>,
    response: Option<String>,
    writers: BTreeMap<ContextField, Writer>,
}

impl Context {
    pub fn new(input: TurnInput) -> Self {
        Self {
            request_text: input.request_text,
            user_id: input.user_id,
            session_id: input.session_id,
            attachments: input.attachments,
            correlation_id: input.correlation_id,
            active_flow: None,
            history: Vec::new(),
            intent: None,
            resume_analysis: None,
            interview: None,
            job_results: None,
            knowledge: None,
            persistence: None,
            errors: Vec::new(),
            response: None,
            writers: BTreeMap::new(),
        }
    }

    /// Prior turns loaded from the durable store before traversal starts.
    pub fn with_history(mut self, history: Vec<TurnSummary>) -> Self {
        self.history = history;
        self
    }

    /// Flow of an incomplete multi-turn session, used for routing tie-breaks.
    pub fn with_active_flow(mut self, active_flow: Option<Intent>) -> Self {
        self.active_flow = active_flow;
        self
    }

    pub fn request_text(&self) -> &str {
        &self.request_text
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn attachments(&self) -> &TurnAttachments {
        &self.attachments
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn active_flow(&self) -> Option<Intent> {
        self.active_flow
    }

    pub fn history(&self) -> &[TurnSummary] {
        &self.history
    }

    pub fn recent_history(&self, window: usize) -> &[TurnSummary] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }

    pub fn intent(&self) -> Option<&IntentDecision> {
        self.intent.as_ref()
    }

    pub fn clarification_required(&self) -> bool {
        self.intent.as_ref().is_some_and(|decision| decision.clarification_required)
    }

    pub fn resume_analysis(&self) -> Option<&ResumeAnalysis> {
        self.resume_analysis.as_ref()
    }

    pub fn interview(&self) -> Option<&InterviewExchange> {
        self.interview.as_ref()
    }

    pub fn job_results(&self) -> Option<&JobSearchResult> {
        self.job_results.as_ref()
    }

    pub fn knowledge(&self) -> Option<&KnowledgeAnswer> {
        self.knowledge.as_ref()
    }

    pub fn persistence(&self) -> Option<&PersistenceReceipt> {
        self.persistence.as_ref()
    }

    pub fn errors(&self) -> &[ContextError] {
        &self.errors
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn writer_of(&self, field: ContextField) -> Option<Writer> {
        self.writers.get(&field).copied()
    }

    pub fn set_intent(&mut self, decision: IntentDecision) -> Result<(), ContextWriteError> {
        self.claim(&[ContextField::Intent], Writer::Router)?;
        self.intent = Some(decision);
        Ok(())
    }

    pub fn set_response(&mut self, response: String) -> Result<(), ContextWriteError> {
        self.claim(&[ContextField::Response], Writer::Responder)?;
        self.response = Some(response);
        Ok(())
    }

    /// Applies every field of `patch` on behalf of `writer`, or nothing.
    pub fn apply_patch(
        &mut self,
        writer: Writer,
        patch: ContextPatch,
    ) -> Result<(), ContextWriteError> {
        self.claim(&patch.fields(), writer)?;

        if let Some(analysis) = patch.resume_analysis {
            self.resume_analysis = Some(analysis);
        }
        if let Some(interview) = patch.interview {
            self.interview = Some(interview);
        }
        if let Some(job_results) = patch.job_results {
            self.job_results = Some(job_results);
        }
        if let Some(knowledge) = patch.knowledge {
            self.knowledge = Some(knowledge);
        }
        if let Some(summary) = patch.history_append {
            self.history.push(summary);
        }
        if let Some(receipt) = patch.persistence {
            self.persistence = Some(receipt);
        }
        Ok(())
    }

    pub fn record_error(
        &mut self,
        source: impl Into<String>,
        class: ErrorClass,
        message: impl Into<String>,
    ) {
        self.record_failure(source, class, message, None);
    }

    pub fn record_failure(
        &mut self,
        source: impl Into<String>,
        class: ErrorClass,
        message: impl Into<String>,
        reason: Option<ErrorReason>,
    ) {
        self.errors.push(ContextError {
            source: source.into(),
            class,
            message: message.into(),
            reason,
            occurred_at: Utc::now(),
        });
    }

    fn claim(&mut self, fields: &[ContextField], writer: Writer) -> Result<(), ContextWriteError> {
        for field in fields {
            if field.owner() != Some(writer) {
                return Err(ContextWriteError::NotOwner { field: *field, writer });
            }
            if let Some(previous) = self.writers.get(field) {
                return Err(ContextWriteError::AlreadyWritten { field: *field, previous: *previous });
            }
        }
        for field in fields {
            self.writers.insert(*field, writer);
        }
        Ok(())
    }
}
