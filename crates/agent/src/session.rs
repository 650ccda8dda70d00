//! Interview Session Manager.
//!
//! Wraps the pure protocol in `careercoach_core::session` with storage,
//! question generation, answer evaluation and per-session serialization.
//! A second submission for a session that already has one in flight is
//! rejected with `Busy`; the stored record is only replaced through a
//! version-checked write, so a lost race surfaces as `Conflict` and never as
//! a half-advanced cursor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use careercoach_core::config::InterviewConfig;
use careercoach_core::domain::payload::InterviewExchange;
use careercoach_core::domain::profile::UserId;
use careercoach_core::domain::session::{
    AnswerFeedback, AnswerRecord, Difficulty, InterviewQuestion, InterviewSession, QuestionId,
    QuestionType, SessionId, SessionSummary,
};
use careercoach_core::errors::{ApplicationError, DomainError};
use careercoach_core::session::{
    apply_answer, check_submission, fallback_questions, resolve_question_count, start_session,
    SessionError,
};
use careercoach_db::repositories::{InterviewSessionRepository, ProfileRepository, RepositoryError};

use crate::llm::{extract_json, parse_llm_json, LlmClient};

pub const DEFAULT_ROLE: &str = "Software Engineer";
pub const DEFAULT_LEVEL: &str = "mid";

#[derive(Clone, Debug, PartialEq)]
pub struct StartRequest {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub role: String,
    pub level: String,
    pub question_count: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StartedSession {
    pub session: InterviewSession,
    pub first_question: InterviewQuestion,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionOutcome {
    pub session: InterviewSession,
    pub answered: AnswerRecord,
    pub next_question: Option<InterviewQuestion>,
    pub session_complete: bool,
}

impl SubmissionOutcome {
    pub fn summary(&self) -> Option<&SessionSummary> {
        self.session.summary.as_ref()
    }
}

pub struct SessionManager {
    sessions: Arc<dyn InterviewSessionRepository>,
    profiles: Arc<dyn ProfileRepository>,
    llm: Arc<dyn LlmClient>,
    config: InterviewConfig,
    in_flight: Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn InterviewSessionRepository>,
        profiles: Arc<dyn ProfileRepository>,
        llm: Arc<dyn LlmClient>,
        config: InterviewConfig,
    ) -> Self {
        Self { sessions, profiles, llm, config, in_flight: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &InterviewConfig {
        &self.config
    }

    /// Generates the question list and stores a new `in_progress` session.
    pub async fn start(&self, request: StartRequest) -> Result<StartedSession, ApplicationError> {
        let count = resolve_question_count(request.question_count, &self.config)?;
        let guard = self.acquire(&request.session_id)?;
        let result = self.start_locked(request, count).await;
        self.release(guard.0, guard.1);
        result
    }

    /// Submits the answer for `question_id`, which must be the question under
    /// the cursor.
    pub async fn submit_answer(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
        answer_text: &str,
    ) -> Result<SubmissionOutcome, ApplicationError> {
        let guard = self.acquire(session_id)?;
        let result = self.submit_locked(session_id, question_id, answer_text).await;
        self.release(guard.0, guard.1);
        result
    }

    pub async fn find(&self, session_id: &SessionId) -> Result<Option<InterviewSession>, ApplicationError> {
        Ok(self.sessions.find(session_id).await?)
    }

    /// Most recent interview run of a conversation with its ordinal. Runs
    /// are stored as `{conversation}`, `{conversation}-2`, `{conversation}-3`...
    pub async fn latest_for_conversation(
        &self,
        conversation: &SessionId,
    ) -> Result<Option<(u32, InterviewSession)>, ApplicationError> {
        let mut latest = None;
        let mut ordinal = 1;
        while let Some(session) = self.find(&conversation_run_id(conversation, ordinal)).await? {
            latest = Some((ordinal, session));
            ordinal += 1;
        }
        Ok(latest)
    }

    pub async fn get(&self, session_id: &SessionId) -> Result<InterviewSession, ApplicationError> {
        self.find(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound { session_id: session_id.0.clone() }.into())
    }

    async fn start_locked(
        &self,
        request: StartRequest,
        count: usize,
    ) -> Result<StartedSession, ApplicationError> {
        if self.sessions.find(&request.session_id).await?.is_some() {
            return Err(SessionError::AlreadyExists { session_id: request.session_id.0 }.into());
        }

        let now = Utc::now();
        self.profiles.ensure_exists(&request.user_id, now).await?;
        let questions = self.generate_questions(&request.role, &request.level, count).await;
        let session = start_session(
            request.session_id.clone(),
            request.user_id,
            request.role,
            request.level,
            questions,
            now,
        )?;

        match self.sessions.insert(session.clone()).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                return Err(SessionError::AlreadyExists { session_id: request.session_id.0 }.into());
            }
            Err(error) => return Err(error.into()),
        }

        tracing::info!(
            event_name = "session.started",
            session_id = %session.id.0,
            user_id = %session.user_id.0,
            question_count = session.question_count(),
        );

        let first_question = session
            .current_question()
            .cloned()
            .ok_or(ApplicationError::Domain(DomainError::Session(SessionError::NoQuestions)))?;
        Ok(StartedSession { session, first_question })
    }

    async fn submit_locked(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
        answer_text: &str,
    ) -> Result<SubmissionOutcome, ApplicationError> {
        let current = self.get(session_id).await?;
        let question = check_submission(&current, question_id, answer_text)?.clone();

        let feedback = self.evaluate(&current, &question, answer_text).await;
        let next = apply_answer(&current, question_id, answer_text, feedback, Utc::now())?;

        if !self.sessions.update_if_version(next.clone(), current.state_version).await? {
            tracing::warn!(
                event_name = "session.answer.conflict",
                session_id = %session_id.0,
                expected_version = current.state_version,
            );
            return Err(SessionError::Conflict { session_id: session_id.0.clone() }.into());
        }

        let answered = next.answers.last().cloned().ok_or_else(|| {
            ApplicationError::Domain(DomainError::InvariantViolation("answer was not recorded".to_string()))
        })?;
        let session_complete = next.is_terminal();
        tracing::info!(
            event_name = if session_complete { "session.completed" } else { "session.answer.accepted" },
            session_id = %session_id.0,
            question_id = %question_id.0,
            score = answered.feedback.overall_score,
        );

        Ok(SubmissionOutcome {
            next_question: next.current_question().cloned(),
            answered,
            session_complete,
            session: next,
        })
    }

    async fn generate_questions(&self, role: &str, level: &str, count: usize) -> Vec<InterviewQuestion> {
        let prompt = format!(
            "Generate exactly {count} interview questions for a {level}-level {role} position. \
             Mix behavioral, technical and situational questions and order them from easier to harder.\n\
             Return a JSON array where each element is \
             {{\"question\": \"...\", \"type\": \"behavioral|technical|situational\", \
             \"difficulty\": \"easy|medium|hard\", \"key_points\": [\"...\"]}}."
        );

        let generated = match self.llm.complete(&prompt).await {
            Ok(reply) => parse_questions(&reply),
            Err(error) => {
                tracing::warn!(event_name = "session.questions.fallback", error = %error);
                Vec::new()
            }
        };
        complete_question_list(generated, role, count)
    }

    async fn evaluate(
        &self,
        session: &InterviewSession,
        question: &InterviewQuestion,
        answer_text: &str,
    ) -> AnswerFeedback {
        let prompt = format!(
            "Evaluate a candidate's interview answer for a {level}-level {role} role.\n\
             Question ({question_type}): {question}\n\
             Key points a good answer covers: {key_points}\n\
             Answer: {answer_text}\n\
             Score each dimension from 1 to 10 and reply with JSON only: \
             {{\"overall_score\": 0, \"dimension_scores\": {{\"relevance\": 0, \"depth\": 0, \
             \"structure\": 0, \"communication\": 0}}, \"strength_areas\": [], \
             \"improvement_areas\": [], \"specific_feedback\": \"\", \"suggested_improvement\": \"\"}}",
            level = session.level,
            role = session.role,
            question_type = question.question_type.as_str(),
            question = question.text,
            key_points = question.key_points.join("; "),
        );

        match self.llm.complete(&prompt).await {
            Ok(reply) => match parse_llm_json::<EvaluationReply>(&reply) {
                Ok(parsed) => parsed.into_feedback(),
                Err(error) => {
                    tracing::warn!(event_name = "session.evaluation.unparsable", error = %error);
                    AnswerFeedback::neutral("The evaluation could not be read; a neutral score was recorded.")
                }
            },
            Err(error) => {
                tracing::warn!(event_name = "session.evaluation.unavailable", error = %error);
                AnswerFeedback::neutral("The evaluator was unavailable; a neutral score was recorded.")
            }
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<AsyncMutex<()>>>> {
        match self.in_flight.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn acquire(&self, session_id: &SessionId) -> Result<(SessionId, OwnedMutexGuard<()>), SessionError> {
        let lock = self.lock_table().entry(session_id.clone()).or_default().clone();
        lock.try_lock_owned()
            .map(|guard| (session_id.clone(), guard))
            .map_err(|_| SessionError::Busy { session_id: session_id.0.clone() })
    }

    fn release(&self, session_id: SessionId, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut table = self.lock_table();
        if table.get(&session_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(&session_id);
        }
    }
}

/// Projection of a session onto the per-turn Context payload.
/// Storage id of the `ordinal`-th interview run in a conversation.
pub fn conversation_run_id(conversation: &SessionId, ordinal: u32) -> SessionId {
    if ordinal <= 1 {
        conversation.clone()
    } else {
        SessionId(format!("{}-{ordinal}", conversation.0))
    }
}

pub fn exchange_for(session: &InterviewSession, answered: Option<AnswerRecord>) -> InterviewExchange {
    InterviewExchange {
        session_id: session.id.clone(),
        role: session.role.clone(),
        level: session.level.clone(),
        status: session.status,
        answered,
        next_question: session.current_question().cloned(),
        question_number: (session.cursor + 1).min(session.question_count()),
        question_count: session.question_count(),
        summary: session.summary.clone(),
    }
}

#[derive(Deserialize)]
struct QuestionReply {
    question: String,
    #[serde(rename = "type", default)]
    question_type: Option<String>,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    key_points: Vec<String>,
}

fn parse_questions(reply: &str) -> Vec<InterviewQuestion> {
    let Some(value) = extract_json(reply) else {
        tracing::warn!(event_name = "session.questions.unparsable");
        return Vec::new();
    };
    let list = match value {
        Value::Object(mut object) => object.remove("questions").unwrap_or(Value::Null),
        other => other,
    };
    let replies: Vec<QuestionReply> = serde_json::from_value(list).unwrap_or_default();

    replies
        .into_iter()
        .filter(|reply| !reply.question.trim().is_empty())
        .map(|reply| InterviewQuestion {
            id: QuestionId(String::new()),
            text: reply.question.trim().to_string(),
            question_type: reply
                .question_type
                .as_deref()
                .and_then(QuestionType::parse)
                .unwrap_or(QuestionType::Behavioral),
            difficulty: reply.difficulty.as_deref().and_then(Difficulty::parse).unwrap_or(Difficulty::Medium),
            key_points: reply.key_points,
        })
        .collect()
}

/// Trims or pads `generated` to exactly `count` questions and numbers them
/// `q1..qN`.
fn complete_question_list(
    mut generated: Vec<InterviewQuestion>,
    role: &str,
    count: usize,
) -> Vec<InterviewQuestion> {
    generated.truncate(count);
    if generated.len() < count {
        for question in fallback_questions(role, count) {
            if generated.len() == count {
                break;
            }
            if !generated.iter().any(|existing| existing.text == question.text) {
                generated.push(question);
            }
        }
    }
    for (index, question) in generated.iter_mut().enumerate() {
        question.id = QuestionId(format!("q{}", index + 1));
    }
    generated
}

#[derive(Default, Deserialize)]
struct DimensionReply {
    relevance: Option<f64>,
    depth: Option<f64>,
    structure: Option<f64>,
    communication: Option<f64>,
}

#[derive(Deserialize)]
struct EvaluationReply {
    overall_score: Option<f64>,
    #[serde(default)]
    dimension_scores: DimensionReply,
    #[serde(default)]
    strength_areas: Vec<String>,
    #[serde(default)]
    improvement_areas: Vec<String>,
    #[serde(default)]
    specific_feedback: Option<String>,
    #[serde(default)]
    suggested_improvement: Option<String>,
}

impl EvaluationReply {
    fn into_feedback(self) -> AnswerFeedback {
        let neutral = AnswerFeedback::neutral("");
        let dimensions = [
            self.dimension_scores.relevance,
            self.dimension_scores.depth,
            self.dimension_scores.structure,
            self.dimension_scores.communication,
        ];
        let known: Vec<f64> = dimensions.iter().flatten().map(|score| clamp_score(*score)).collect();
        let overall = self.overall_score.map(clamp_score).unwrap_or_else(|| {
            if known.is_empty() {
                neutral.overall_score
            } else {
                round_one(known.iter().sum::<f64>() / known.len() as f64)
            }
        });
        let dimension = |value: Option<f64>| value.map(clamp_score).unwrap_or(neutral.relevance);

        AnswerFeedback {
            overall_score: overall,
            relevance: dimension(dimensions[0]),
            depth: dimension(dimensions[1]),
            structure: dimension(dimensions[2]),
            communication: dimension(dimensions[3]),
            strength_areas: self.strength_areas,
            improvement_areas: self.improvement_areas,
            specific_feedback: self.specific_feedback.unwrap_or_default(),
            suggested_improvement: self.suggested_improvement.unwrap_or(neutral.suggested_improvement),
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        5.0
    } else {
        round_one(score.clamp(1.0, 10.0))
    }
}

fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
