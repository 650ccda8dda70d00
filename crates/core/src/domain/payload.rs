//! Typed payloads produced by capabilities and carried on the [`Context`].
//!
//! [`Context`]: crate::context::Context

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::application::JobApplication;
use crate::domain::session::{
    AnswerRecord, InterviewQuestion, SessionId, SessionStatus, SessionSummary,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordAnalysis {
    pub matched: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResumeAnalysis {
    pub overall_score: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub ats_compatibility: String,
    pub keyword_analysis: KeywordAnalysis,
    pub section_feedback: BTreeMap<String, String>,
    pub improved_bullets: Vec<String>,
    pub formatting_sources: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterviewExchange {
    pub session_id: SessionId,
    pub role: String,
    pub level: String,
    pub status: SessionStatus,
    pub answered: Option<AnswerRecord>,
    pub next_question: Option<InterviewQuestion>,
    /// 1-based position of `next_question`.
    pub question_number: usize,
    pub question_count: usize,
    pub summary: Option<SessionSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPlace {
    pub display_name: String,
    pub coordinates: Coordinates,
    pub country: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearbyEmployer {
    pub name: String,
    pub category: String,
    pub coordinates: Coordinates,
    pub distance_m: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub url: Option<String>,
    pub salary_range: Option<String>,
    pub remote_friendly: bool,
    pub match_score: f64,
    pub experience_level: String,
    pub key_skills: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSearchResult {
    pub query: String,
    pub location: Option<String>,
    pub place: Option<ResolvedPlace>,
    pub nearby_employers: Vec<NearbyEmployer>,
    pub listings: Vec<JobListing>,
    pub tracked_applications: Vec<JobApplication>,
    pub notes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePassage {
    pub text: String,
    pub source_id: String,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeAnswer {
    pub query: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub related_topics: Vec<String>,
    pub passages: Vec<KnowledgePassage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceReceipt {
    pub turn_id: String,
    pub persisted_at: String,
}
