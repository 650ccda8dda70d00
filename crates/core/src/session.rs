//! Interview session protocol: `NOT_STARTED -> IN_PROGRESS -> COMPLETE`.
//!
//! The cursor is the single source of truth for the current question. All
//! functions here are pure; storage and per-session serialization live with
//! the caller.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::InterviewConfig;
use crate::domain::profile::UserId;
use crate::domain::session::{
    AnswerFeedback, AnswerRecord, Difficulty, InterviewQuestion, InterviewSession,
    PerformanceLevel, QuestionId, QuestionType, SessionId, SessionStatus, SessionSummary,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("question count must be between 1 and {max}, got {requested}")]
    InvalidQuestionCount { requested: usize, max: usize },
    #[error("an interview needs at least one question")]
    NoQuestions,
    #[error("interview session `{session_id}` was not found")]
    NotFound { session_id: String },
    #[error("interview session `{session_id}` already exists")]
    AlreadyExists { session_id: String },
    #[error("interview session `{session_id}` is complete; no further answers are accepted")]
    AlreadyComplete { session_id: String },
    #[error("interview session `{session_id}` has not started")]
    NotStarted { session_id: String },
    #[error("interview session `{session_id}` belongs to another user")]
    NotOwner { session_id: String },
    #[error(
        "answer for `{submitted}` rejected: expected question `{expected}` (question {slot} of {total})"
    )]
    OutOfOrder { session_id: String, expected: String, submitted: String, slot: usize, total: usize },
    #[error("answer text must not be empty")]
    EmptyAnswer,
    #[error("another submission for interview session `{session_id}` is in flight")]
    Busy { session_id: String },
    #[error("interview session `{session_id}` changed concurrently; retry with the current question")]
    Conflict { session_id: String },
}

impl SessionError {
    /// Id of the question the caller should answer next, when known.
    pub fn expected_question(&self) -> Option<&str> {
        match self {
            Self::OutOfOrder { expected, .. } => Some(expected),
            _ => None,
        }
    }
}

/// Resolves the requested question count against configured bounds.
pub fn resolve_question_count(
    requested: Option<usize>,
    config: &InterviewConfig,
) -> Result<usize, SessionError> {
    let count = requested.unwrap_or(config.default_question_count);
    if count == 0 || count > config.max_question_count {
        return Err(SessionError::InvalidQuestionCount {
            requested: count,
            max: config.max_question_count,
        });
    }
    Ok(count)
}

/// Creates an `IN_PROGRESS` session with the cursor on the first question.
pub fn start_session(
    id: SessionId,
    user_id: UserId,
    role: impl Into<String>,
    level: impl Into<String>,
    questions: Vec<InterviewQuestion>,
    now: DateTime<Utc>,
) -> Result<InterviewSession, SessionError> {
    if questions.is_empty() {
        return Err(SessionError::NoQuestions);
    }

    Ok(InterviewSession {
        id,
        user_id,
        role: role.into(),
        level: level.into(),
        questions,
        answers: Vec::new(),
        cursor: 0,
        status: SessionStatus::InProgress,
        summary: None,
        score: None,
        state_version: 1,
        created_at: now,
        updated_at: now,
        completed_at: None,
    })
}

/// Checks that `question_id` is the question under the cursor. Returns it.
pub fn check_submission<'a>(
    session: &'a InterviewSession,
    question_id: &QuestionId,
    answer_text: &str,
) -> Result<&'a InterviewQuestion, SessionError> {
    let session_id = session.id.0.clone();
    match session.status {
        SessionStatus::NotStarted => return Err(SessionError::NotStarted { session_id }),
        SessionStatus::Complete => return Err(SessionError::AlreadyComplete { session_id }),
        SessionStatus::InProgress => {}
    }

    let Some(expected) = session.questions.get(session.cursor) else {
        return Err(SessionError::AlreadyComplete { session_id });
    };
    if expected.id != *question_id {
        return Err(SessionError::OutOfOrder {
            session_id,
            expected: expected.id.0.clone(),
            submitted: question_id.0.clone(),
            slot: session.cursor + 1,
            total: session.questions.len(),
        });
    }
    if answer_text.trim().is_empty() {
        return Err(SessionError::EmptyAnswer);
    }
    Ok(expected)
}

/// Returns the next version of `session` with the answer appended and the
/// cursor advanced. The input record is left untouched.
pub fn apply_answer(
    session: &InterviewSession,
    question_id: &QuestionId,
    answer_text: &str,
    feedback: AnswerFeedback,
    now: DateTime<Utc>,
) -> Result<InterviewSession, SessionError> {
    let question = check_submission(session, question_id, answer_text)?;
    let record = AnswerRecord {
        question_id: question.id.clone(),
        question: question.text.clone(),
        answer: answer_text.trim().to_string(),
        feedback,
        answered_at: now,
    };

    let mut next = session.clone();
    next.answers.push(record);
    next.cursor += 1;
    next.state_version += 1;
    next.updated_at = now;

    if next.cursor >= next.questions.len() {
        let summary = summarize(&next.answers, next.questions.len());
        next.status = SessionStatus::Complete;
        next.score = Some(summary.overall_score);
        next.summary = Some(summary);
        next.completed_at = Some(now);
    }

    Ok(next)
}

/// Score-based summary of a finished session.
pub fn summarize(answers: &[AnswerRecord], total_questions: usize) -> SessionSummary {
    let overall_score = round_one(mean(answers.iter().map(|record| record.feedback.overall_score)));
    let performance_level = PerformanceLevel::from_score(overall_score);

    let mut dimensions: Vec<(&'static str, f64)> = ["relevance", "depth", "structure", "communication"]
        .into_iter()
        .map(|name| {
            let average = mean(answers.iter().flat_map(|record| {
                record
                    .feedback
                    .dimension_scores()
                    .into_iter()
                    .filter(move |(dimension, _)| *dimension == name)
                    .map(|(_, score)| score)
            }));
            (name, average)
        })
        .collect();
    dimensions.sort_by(|left, right| right.1.total_cmp(&left.1));

    let strongest_areas = dimensions.iter().take(2).map(|(name, _)| (*name).to_string()).collect();
    let weakest_areas =
        dimensions.iter().rev().take(2).map(|(name, _)| (*name).to_string()).collect();

    let mut key_recommendations: Vec<String> = Vec::new();
    for record in answers {
        for area in &record.feedback.improvement_areas {
            if !key_recommendations.contains(area) {
                key_recommendations.push(area.clone());
            }
        }
    }
    key_recommendations.truncate(3);
    if key_recommendations.is_empty() {
        key_recommendations
            .push("Review your answers and practice with the STAR method.".to_string());
    }

    let interview_readiness = match performance_level {
        PerformanceLevel::Exceptional | PerformanceLevel::Strong => {
            "Ready for interviews at this level."
        }
        PerformanceLevel::Competent => "Nearly ready; polish the weaker areas before interviewing.",
        PerformanceLevel::Developing => "More practice needed before interviewing at this level.",
        PerformanceLevel::NeedsImprovement => {
            "Significant preparation needed; start with the fundamentals of each question type."
        }
    }
    .to_string();

    SessionSummary {
        overall_score,
        total_questions,
        performance_level,
        strongest_areas,
        weakest_areas,
        key_recommendations,
        interview_readiness,
        next_steps: vec![
            "Practice more mock interviews".to_string(),
            "Rewrite your lowest-scoring answer using the STAR method".to_string(),
        ],
    }
}

/// Generic questions used when generation is unavailable.
pub fn fallback_questions(role: &str, count: usize) -> Vec<InterviewQuestion> {
    let bank: [(String, QuestionType, Difficulty); 10] = [
        (
            format!("Tell me about yourself and why you're interested in this {role} role."),
            QuestionType::Behavioral,
            Difficulty::Easy,
        ),
        (
            "Describe a challenging project you worked on. What was the outcome?".to_string(),
            QuestionType::Behavioral,
            Difficulty::Medium,
        ),
        (
            "How do you handle tight deadlines and competing priorities?".to_string(),
            QuestionType::Situational,
            Difficulty::Medium,
        ),
        (
            "What is your greatest professional achievement so far?".to_string(),
            QuestionType::Behavioral,
            Difficulty::Easy,
        ),
        (
            "Where do you see yourself in the next 2-3 years?".to_string(),
            QuestionType::Behavioral,
            Difficulty::Easy,
        ),
        (
            format!("Walk me through a technical decision you made as a {role} and its trade-offs."),
            QuestionType::Technical,
            Difficulty::Medium,
        ),
        (
            "Tell me about a time you disagreed with a teammate. How was it resolved?".to_string(),
            QuestionType::Behavioral,
            Difficulty::Medium,
        ),
        (
            "A production issue appears an hour before a release. What do you do?".to_string(),
            QuestionType::Situational,
            Difficulty::Hard,
        ),
        (
            "How do you keep your skills current?".to_string(),
            QuestionType::Behavioral,
            Difficulty::Easy,
        ),
        (
            "Describe how you would design a system you know well for ten times the load."
                .to_string(),
            QuestionType::Technical,
            Difficulty::Hard,
        ),
    ];

    bank.into_iter()
        .take(count)
        .enumerate()
        .map(|(index, (text, question_type, difficulty))| InterviewQuestion {
            id: QuestionId(format!("q{}", index + 1)),
            text,
            question_type,
            difficulty,
            key_points: vec!["Clear communication".to_string(), "Relevant experience".to_string()],
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        apply_answer, check_submission, fallback_questions, resolve_question_count,
        start_session, summarize, SessionError,
    };
    use crate::config::InterviewConfig;
    use crate::domain::profile::UserId;
    use crate::domain::session::{
        AnswerFeedback, InterviewSession, PerformanceLevel, QuestionId, SessionId, SessionStatus,
    };

    fn session(count: usize) -> InterviewSession {
        start_session(
            SessionId("session-1".to_string()),
            UserId("user-1".to_string()),
            "Software Engineer",
            "senior",
            fallback_questions("Software Engineer", count),
            Utc::now(),
        )
        .expect("start")
    }

    fn feedback(score: f64) -> AnswerFeedback {
        AnswerFeedback { overall_score: score, relevance: score, ..AnswerFeedback::neutral("ok") }
    }

    #[test]
    fn start_places_cursor_on_first_question() {
        let session = session(3);

        assert_eq!(session.status, SessionStatus::InProgress);
        assert_eq!(session.cursor, 0);
        assert_eq!(session.current_question().map(|q| q.id.0.as_str()), Some("q1"));
        assert_eq!(session.question_count(), 3);
    }

    #[test]
    fn question_count_is_bounded() {
        let config = InterviewConfig::default();
        assert_eq!(resolve_question_count(None, &config), Ok(5));
        assert_eq!(resolve_question_count(Some(3), &config), Ok(3));
        assert_eq!(
            resolve_question_count(Some(11), &config),
            Err(SessionError::InvalidQuestionCount { requested: 11, max: 10 })
        );
        assert!(resolve_question_count(Some(0), &config).is_err());
    }

    #[test]
    fn out_of_order_answer_is_rejected_and_names_expected_slot() {
        let session = session(3);
        let before = session.clone();

        for _ in 0..2 {
            let error = apply_answer(
                &session,
                &QuestionId("q2".to_string()),
                "An answer",
                feedback(7.0),
                Utc::now(),
            )
            .expect_err("q2 is not current");
            assert_eq!(error.expected_question(), Some("q1"));
            assert!(matches!(error, SessionError::OutOfOrder { slot: 1, total: 3, .. }));
        }
        assert_eq!(session, before);
    }

    #[test]
    fn resubmitting_a_past_slot_is_rejected() {
        let first = apply_answer(
            &session(3),
            &QuestionId("q1".to_string()),
            "My answer",
            feedback(6.0),
            Utc::now(),
        )
        .expect("q1");

        let error = apply_answer(
            &first,
            &QuestionId("q1".to_string()),
            "My answer",
            feedback(6.0),
            Utc::now(),
        )
        .expect_err("slot already advanced");
        assert_eq!(error.expected_question(), Some("q2"));
        assert_eq!(first.cursor, 1);
        assert_eq!(first.state_version, 2);
    }

    #[test]
    fn final_answer_completes_with_summary_and_locks_session() {
        let mut session = session(3);
        for (index, score) in [6.0, 8.0, 10.0].into_iter().enumerate() {
            session = apply_answer(
                &session,
                &QuestionId(format!("q{}", index + 1)),
                "Situation, task, action, result.",
                feedback(score),
                Utc::now(),
            )
            .expect("in-order answer");
        }

        assert_eq!(session.status, SessionStatus::Complete);
        assert_eq!(session.score, Some(8.0));
        assert!(session.completed_at.is_some());
        let summary = session.summary.as_ref().expect("summary");
        assert_eq!(summary.total_questions, 3);
        assert_eq!(summary.performance_level, PerformanceLevel::Strong);

        let error = check_submission(&session, &QuestionId("q3".to_string()), "again")
            .expect_err("complete sessions reject answers");
        assert!(matches!(error, SessionError::AlreadyComplete { .. }));
    }

    #[test]
    fn empty_answer_is_rejected() {
        let error = check_submission(&session(1), &QuestionId("q1".to_string()), "   ")
            .expect_err("empty");
        assert_eq!(error, SessionError::EmptyAnswer);
    }

    #[test]
    fn summary_ranks_dimensions() {
        let session = session(1);
        let answered = apply_answer(
            &session,
            &QuestionId("q1".to_string()),
            "answer",
            AnswerFeedback {
                overall_score: 7.0,
                relevance: 9.0,
                depth: 4.0,
                structure: 6.0,
                communication: 8.0,
                improvement_areas: vec!["Go deeper on impact".to_string()],
                ..AnswerFeedback::neutral("ok")
            },
            Utc::now(),
        )
        .expect("answer");

        let summary = summarize(&answered.answers, 1);
        assert_eq!(summary.strongest_areas, vec!["relevance", "communication"]);
        assert_eq!(summary.weakest_areas, vec!["depth", "structure"]);
        assert_eq!(summary.key_recommendations, vec!["Go deeper on impact"]);
    }

    #[test]
    fn fallback_bank_produces_sequential_ids() {
        let questions = fallback_questions("Data Analyst", 10);
        assert_eq!(questions.len(), 10);
        assert_eq!(questions[9].id.0, "q10");
        assert!(questions[0].text.contains("Data Analyst"));
    }
}
