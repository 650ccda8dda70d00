use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::profile::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Behavioral,
    Technical,
    Situational,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Behavioral => "behavioral",
            Self::Technical => "technical",
            Self::Situational => "situational",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "behavioral" | "behavioural" => Some(Self::Behavioral),
            "technical" => Some(Self::Technical),
            "situational" => Some(Self::Situational),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterviewQuestion {
    pub id: QuestionId,
    pub text: String,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub key_points: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerFeedback {
    pub overall_score: f64,
    pub relevance: f64,
    pub depth: f64,
    pub structure: f64,
    pub communication: f64,
    pub strength_areas: Vec<String>,
    pub improvement_areas: Vec<String>,
    pub specific_feedback: String,
    pub suggested_improvement: String,
}

impl AnswerFeedback {
    /// Neutral mid-scale feedback used when an evaluation cannot be parsed.
    pub fn neutral(note: impl Into<String>) -> Self {
        Self {
            overall_score: 5.0,
            relevance: 5.0,
            depth: 5.0,
            structure: 5.0,
            communication: 5.0,
            strength_areas: Vec::new(),
            improvement_areas: Vec::new(),
            specific_feedback: note.into(),
            suggested_improvement:
                "Structure the answer with the STAR method and quantify the outcome.".to_string(),
        }
    }

    pub fn dimension_scores(&self) -> [(&'static str, f64); 4] {
        [
            ("relevance", self.relevance),
            ("depth", self.depth),
            ("structure", self.structure),
            ("communication", self.communication),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub question: String,
    pub answer: String,
    pub feedback: AnswerFeedback,
    pub answered_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Complete,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Exceptional,
    Strong,
    Competent,
    Developing,
    NeedsImprovement,
}

impl PerformanceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 9.0 {
            Self::Exceptional
        } else if score >= 7.5 {
            Self::Strong
        } else if score >= 6.0 {
            Self::Competent
        } else if score >= 4.0 {
            Self::Developing
        } else {
            Self::NeedsImprovement
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exceptional => "exceptional",
            Self::Strong => "strong",
            Self::Competent => "competent",
            Self::Developing => "developing",
            Self::NeedsImprovement => "needs_improvement",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub overall_score: f64,
    pub total_questions: usize,
    pub performance_level: PerformanceLevel,
    pub strongest_areas: Vec<String>,
    pub weakest_areas: Vec<String>,
    pub key_recommendations: Vec<String>,
    pub interview_readiness: String,
    pub next_steps: Vec<String>,
}

/// Durable record of one interview practice flow, keyed by the conversation's
/// session id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterviewSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub role: String,
    pub level: String,
    pub questions: Vec<InterviewQuestion>,
    pub answers: Vec<AnswerRecord>,
    pub cursor: usize,
    pub status: SessionStatus,
    pub summary: Option<SessionSummary>,
    pub score: Option<f64>,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InterviewSession {
    pub fn current_question(&self) -> Option<&InterviewQuestion> {
        match self.status {
            SessionStatus::InProgress => self.questions.get(self.cursor),
            SessionStatus::NotStarted | SessionStatus::Complete => None,
        }
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status == SessionStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::{PerformanceLevel, SessionStatus};

    #[test]
    fn performance_level_thresholds() {
        assert_eq!(PerformanceLevel::from_score(9.0), PerformanceLevel::Exceptional);
        assert_eq!(PerformanceLevel::from_score(7.5), PerformanceLevel::Strong);
        assert_eq!(PerformanceLevel::from_score(7.49), PerformanceLevel::Competent);
        assert_eq!(PerformanceLevel::from_score(4.0), PerformanceLevel::Developing);
        assert_eq!(PerformanceLevel::from_score(3.9), PerformanceLevel::NeedsImprovement);
    }

    #[test]
    fn session_status_round_trips_from_storage_encoding() {
        for status in
            [SessionStatus::NotStarted, SessionStatus::InProgress, SessionStatus::Complete]
        {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
    }
}
