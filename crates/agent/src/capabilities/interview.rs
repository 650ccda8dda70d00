//! Conversational front of the interview practice flow.
//!
//! A conversation holds a sequence of interview runs. The first run is
//! stored under the conversation's session id and every restart after a
//! completed run gets the next ordinal (`{session}-2`, `{session}-3`...).
//! Only the latest run accepts answers.

use std::sync::Arc;

use async_trait::async_trait;

use careercoach_core::domain::intent::IntentLabel;
use careercoach_core::domain::session::{SessionId, SessionStatus};
use careercoach_core::session::SessionError;
use careercoach_core::{
    Capability, CapabilityError, CapabilityKind, Context, ContextField, ContextPatch, FanOut,
};

use super::{from_application, routed_label};
use crate::session::{
    conversation_run_id, exchange_for, SessionManager, StartRequest, DEFAULT_LEVEL, DEFAULT_ROLE,
};

pub struct InterviewCapability {
    sessions: Arc<SessionManager>,
}

impl InterviewCapability {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    async fn start(&self, context: &Context, session_id: SessionId) -> Result<ContextPatch, CapabilityError> {
        let attachments = context.attachments();
        let started = self
            .sessions
            .start(StartRequest {
                session_id,
                user_id: context.user_id().clone(),
                role: attachments.role.clone().unwrap_or_else(|| DEFAULT_ROLE.to_string()),
                level: attachments.level.clone().unwrap_or_else(|| DEFAULT_LEVEL.to_string()),
                question_count: attachments.question_count,
            })
            .await
            .map_err(from_application)?;

        Ok(ContextPatch { interview: Some(exchange_for(&started.session, None)), ..ContextPatch::default() })
    }
}

#[async_trait]
impl Capability for InterviewCapability {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Interview
    }

    fn consumes(&self) -> &'static [ContextField] {
        &[
            ContextField::RequestText,
            ContextField::UserId,
            ContextField::SessionId,
            ContextField::Attachments,
            ContextField::Intent,
        ]
    }

    fn produces(&self) -> &'static [ContextField] {
        &[ContextField::InterviewExchange]
    }

    async fn run(&self, context: &Context, _fan_out: &FanOut<'_>) -> Result<ContextPatch, CapabilityError> {
        let conversation = context.session_id();
        let latest = self.sessions.latest_for_conversation(conversation).await.map_err(from_application)?;

        let Some((ordinal, session)) = latest else {
            return self.start(context, conversation.clone()).await;
        };
        if session.user_id != *context.user_id() {
            return Err(CapabilityError::Rejected(
                SessionError::NotOwner { session_id: session.id.0.clone() }.to_string(),
            ));
        }

        match session.status {
            SessionStatus::Complete if routed_label(context) == IntentLabel::InterviewStart => {
                self.start(context, conversation_run_id(conversation, ordinal + 1)).await
            }
            SessionStatus::Complete => Err(CapabilityError::Rejected(
                SessionError::AlreadyComplete { session_id: session.id.0.clone() }.to_string(),
            )),
            SessionStatus::NotStarted => Err(CapabilityError::Rejected(
                SessionError::NotStarted { session_id: session.id.0.clone() }.to_string(),
            )),
            SessionStatus::InProgress if routed_label(context) == IntentLabel::InterviewAnswer => {
                let question_id = session
                    .current_question()
                    .map(|question| question.id.clone())
                    .ok_or_else(|| CapabilityError::Contract("in-progress session has no current question".to_string()))?;
                let outcome = self
                    .sessions
                    .submit_answer(&session.id, &question_id, context.request_text())
                    .await
                    .map_err(from_application)?;
                Ok(ContextPatch {
                    interview: Some(exchange_for(&outcome.session, Some(outcome.answered))),
                    ..ContextPatch::default()
                })
            }
            SessionStatus::InProgress => {
                Ok(ContextPatch { interview: Some(exchange_for(&session, None)), ..ContextPatch::default() })
            }
        }
    }
}
