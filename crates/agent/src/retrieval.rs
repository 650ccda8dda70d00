//! Knowledge retrieval seam.
//!
//! The backend contract is "given a query, return ranked passages with a
//! similarity score in [0, 1] and a source identifier". The bundled
//! [`InMemoryKnowledgeIndex`] scores by token overlap and ships with a small
//! career-coaching corpus so the system answers sensibly without a vector
//! store.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use careercoach_core::domain::payload::KnowledgePassage;

#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    /// Up to `k` passages, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<KnowledgePassage>>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct KnowledgeDocument {
    pub source_id: String,
    pub text: String,
}

impl KnowledgeDocument {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { source_id: source_id.into(), text: text.into() }
    }
}

#[derive(Clone, Debug)]
pub struct InMemoryKnowledgeIndex {
    documents: Vec<(KnowledgeDocument, BTreeSet<String>)>,
}

impl InMemoryKnowledgeIndex {
    pub fn new(documents: Vec<KnowledgeDocument>) -> Self {
        let documents = documents
            .into_iter()
            .map(|document| {
                let terms = terms(&document.text);
                (document, terms)
            })
            .collect();
        Self { documents }
    }

    pub fn with_career_corpus() -> Self {
        Self::new(career_corpus())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl Default for InMemoryKnowledgeIndex {
    fn default() -> Self {
        Self::with_career_corpus()
    }
}

#[async_trait]
impl KnowledgeSearch for InMemoryKnowledgeIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<KnowledgePassage>> {
        let query_terms = terms(query);
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<KnowledgePassage> = self
            .documents
            .iter()
            .filter_map(|(document, document_terms)| {
                let shared = query_terms.intersection(document_terms).count();
                if shared == 0 {
                    return None;
                }
                let score = shared as f64 / query_terms.len() as f64;
                Some(KnowledgePassage {
                    text: document.text.clone(),
                    source_id: document.source_id.clone(),
                    score: (score * 10_000.0).round() / 10_000.0,
                })
            })
            .collect();

        scored.sort_by(|left, right| {
            right.score.total_cmp(&left.score).then_with(|| left.source_id.cmp(&right.source_id))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

const STOP_WORDS: [&str; 28] = [
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "for", "from", "how", "i",
    "in", "is", "it", "me", "my", "of", "on", "or", "should", "the", "to", "what", "with",
    "you",
];

pub(crate) fn terms(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| token.len() > 1 && !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

fn career_corpus() -> Vec<KnowledgeDocument> {
    vec![
        KnowledgeDocument::new(
            "resume_formatting.md",
            "Keep a resume to one page for under ten years of experience. Use reverse-chronological \
             order, consistent headings, and a simple single-column layout so applicant tracking \
             systems (ATS) can parse every section.",
        ),
        KnowledgeDocument::new(
            "resume_bullets.md",
            "Write resume bullet points that start with a strong action verb, describe the task, and \
             quantify the result, for example: Reduced API latency by 40% by introducing caching.",
        ),
        KnowledgeDocument::new(
            "ats_keywords.md",
            "Applicant tracking systems rank resumes by keyword match against the job description. \
             Mirror the exact skill names from the posting and avoid tables, images and headers \
             that hide text from the parser.",
        ),
        KnowledgeDocument::new(
            "star_method.md",
            "Answer behavioral interview questions with the STAR method: Situation, Task, Action, \
             Result. Spend most of the answer on your actions and close with a measurable result.",
        ),
        KnowledgeDocument::new(
            "interview_preparation.md",
            "Prepare for an interview by researching the company, rehearsing stories for common \
             behavioral questions, reviewing core technical topics for the role, and preparing \
             two or three thoughtful questions for the interviewer.",
        ),
        KnowledgeDocument::new(
            "salary_negotiation.md",
            "Negotiate salary after receiving an offer. Research market rates for the role and \
             location, anchor with a specific number at the top of your range, and consider the \
             full package including equity, bonus and benefits.",
        ),
        KnowledgeDocument::new(
            "job_search_strategy.md",
            "An effective job search combines targeted applications, networking and referrals. \
             Track every application with its status and follow up one week after applying.",
        ),
        KnowledgeDocument::new(
            "career_change.md",
            "When changing careers, map transferable skills to the new field, build a small \
             portfolio of relevant projects, and use informational interviews to learn the \
             vocabulary of the target industry.",
        ),
        KnowledgeDocument::new(
            "remote_work.md",
            "Remote roles reward written communication and self-management. Highlight async \
             collaboration, documentation habits and results delivered across time zones.",
        ),
        KnowledgeDocument::new(
            "linkedin_profile.md",
            "A strong LinkedIn profile has a specific headline, a summary focused on impact, and \
             skills that match the roles you are targeting so recruiters can find you.",
        ),
    ]
}
