//! Job search and application tracking.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use careercoach_core::domain::intent::IntentLabel;
use careercoach_core::domain::payload::{JobListing, JobSearchResult, NearbyEmployer, ResolvedPlace};
use careercoach_core::{
    Capability, CapabilityError, CapabilityKind, Context, ContextField, ContextPatch, FanOut,
};
use careercoach_db::repositories::ApplicationRepository;

use super::{request_mentions, round2, routed_label};
use crate::geo::GeoLocator;
use crate::llm::{parse_llm_json, truncate, LlmClient};

const LISTING_COUNT: usize = 5;
const DEFAULT_MATCH_SCORE: f64 = 0.5;
const PROMPT_EMPLOYERS: usize = 5;

pub struct JobsCapability {
    llm: Arc<dyn LlmClient>,
    geo: Arc<dyn GeoLocator>,
    applications: Arc<dyn ApplicationRepository>,
    search_radius_m: u32,
}

/// What the user asked for, after defaults.
#[derive(Clone, Debug, PartialEq)]
struct SearchRequest {
    query: String,
    location: Option<String>,
    level: String,
    remote_ok: bool,
}

impl JobsCapability {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        geo: Arc<dyn GeoLocator>,
        applications: Arc<dyn ApplicationRepository>,
        search_radius_m: u32,
    ) -> Self {
        Self { llm, geo, applications, search_radius_m }
    }

    async fn track(&self, context: &Context) -> Result<ContextPatch, CapabilityError> {
        let tracked = self
            .applications
            .list_for_user(context.user_id(), None)
            .await
            .map_err(|error| CapabilityError::Persistence(error.to_string()))?;

        Ok(ContextPatch {
            job_results: Some(JobSearchResult {
                query: context.request_text().to_string(),
                location: None,
                place: None,
                nearby_employers: Vec::new(),
                listings: Vec::new(),
                tracked_applications: tracked,
                notes: Vec::new(),
            }),
            ..ContextPatch::default()
        })
    }

    async fn locate(&self, location: &str, notes: &mut Vec<String>) -> (Option<ResolvedPlace>, Vec<NearbyEmployer>) {
        let place = match self.geo.resolve(location).await {
            Ok(Some(place)) => place,
            Ok(None) => {
                notes.push(format!("Could not find a place called \"{location}\"."));
                return (None, Vec::new());
            }
            Err(error) => {
                tracing::warn!(event_name = "capability.jobs.geo_failed", location, error = %error);
                notes.push("Location lookup is unavailable right now.".to_string());
                return (None, Vec::new());
            }
        };

        let employers = match self.geo.nearby(&place.coordinates, self.search_radius_m).await {
            Ok(employers) => employers,
            Err(error) => {
                tracing::warn!(event_name = "capability.jobs.nearby_failed", location, error = %error);
                notes.push("Nearby employer lookup is unavailable right now.".to_string());
                Vec::new()
            }
        };
        (Some(place), employers)
    }

    /// Skill hints from a same-turn resume consultation.
    async fn resume_skills(&self, context: &Context, fan_out: &FanOut<'_>, notes: &mut Vec<String>) -> Vec<String> {
        let has_resume = context.attachments().resume_text.as_deref().is_some_and(|text| !text.trim().is_empty());
        if !has_resume || fan_out.is_nested() {
            return Vec::new();
        }
        match fan_out.consult(CapabilityKind::Resume, context).await {
            Ok(patch) => patch
                .resume_analysis
                .map(|analysis| {
                    let mut skills = analysis.keyword_analysis.matched;
                    skills.extend(analysis.strengths);
                    skills.truncate(10);
                    skills
                })
                .unwrap_or_default(),
            Err(error) => {
                tracing::warn!(
                    event_name = "capability.fan_out.skipped",
                    caller = "jobs",
                    callee = "resume",
                    correlation_id = context.correlation_id(),
                    error = %error,
                );
                notes.push("Listings were not matched against your resume.".to_string());
                Vec::new()
            }
        }
    }

    fn prompt(request: &SearchRequest, employers: &[NearbyEmployer], skills: &[String]) -> String {
        let location = request.location.as_deref().unwrap_or("anywhere");
        let employers = if employers.is_empty() {
            "(none found)".to_string()
        } else {
            employers
                .iter()
                .take(PROMPT_EMPLOYERS)
                .map(|employer| format!("{} ({})", employer.name, employer.category))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let skills = if skills.is_empty() { "(unknown)".to_string() } else { skills.join(", ") };

        format!(
            "Generate {LISTING_COUNT} realistic job listings.\n\
             Role or keywords: {query}\n\
             Location: {location}\n\
             Experience level: {level}\n\
             Remote OK: {remote_ok}\n\
             Employers near the location: {employers}\n\
             Candidate skills: {skills}\n\
             Score match_score from 0.0 to 1.0 against the candidate skills. \
             Reply with a JSON array only, each element: {{\"title\": \"\", \"company\": \"\", \
             \"location\": \"\", \"description\": \"\", \"url\": null, \"salary_range\": \"\", \
             \"remote_friendly\": false, \"match_score\": 0.0, \"experience_level\": \"\", \"key_skills\": []}}",
            query = request.query,
            level = request.level,
            remote_ok = request.remote_ok,
        )
    }

    async fn listings(
        &self,
        context: &Context,
        request: &SearchRequest,
        employers: &[NearbyEmployer],
        skills: &[String],
        notes: &mut Vec<String>,
    ) -> Vec<JobListing> {
        let generated = match self.llm.complete(&Self::prompt(request, employers, skills)).await {
            Ok(reply) => parse_llm_json::<Vec<ListingReply>>(&reply).map_err(|error| error.to_string()),
            Err(error) => Err(error.to_string()),
        };

        match generated {
            Ok(replies) if !replies.is_empty() => normalize_listings(replies, request),
            other => {
                if let Err(error) = other {
                    tracing::warn!(
                        event_name = "capability.jobs.listing_fallback",
                        correlation_id = context.correlation_id(),
                        error = %error,
                    );
                }
                notes.push("Live listings are unavailable; showing general openings for this role.".to_string());
                fallback_listings(request)
            }
        }
    }
}

#[async_trait]
impl Capability for JobsCapability {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Jobs
    }

    fn consumes(&self) -> &'static [ContextField] {
        &[ContextField::RequestText, ContextField::UserId, ContextField::Attachments, ContextField::Intent]
    }

    fn produces(&self) -> &'static [ContextField] {
        &[ContextField::JobResults]
    }

    async fn run(&self, context: &Context, fan_out: &FanOut<'_>) -> Result<ContextPatch, CapabilityError> {
        if routed_label(context) == IntentLabel::ApplicationTracking {
            return self.track(context).await;
        }

        let request = search_request(context);
        let mut notes = Vec::new();
        let (place, nearby_employers) = match request.location.as_deref() {
            Some(location) => self.locate(location, &mut notes).await,
            None => (None, Vec::new()),
        };
        let skills = self.resume_skills(context, fan_out, &mut notes).await;
        let listings = self.listings(context, &request, &nearby_employers, &skills, &mut notes).await;

        tracing::info!(
            event_name = "capability.jobs.searched",
            correlation_id = context.correlation_id(),
            listings = listings.len(),
            nearby_employers = nearby_employers.len(),
        );
        Ok(ContextPatch {
            job_results: Some(JobSearchResult {
                query: request.query,
                location: request.location,
                place,
                nearby_employers,
                listings,
                tracked_applications: Vec::new(),
                notes,
            }),
            ..ContextPatch::default()
        })
    }
}

fn search_request(context: &Context) -> SearchRequest {
    let attachments = context.attachments();
    let query = attachments
        .role
        .clone()
        .unwrap_or_else(|| truncate(context.request_text().trim(), 200).to_string());
    let location = attachments
        .location
        .clone()
        .filter(|location| !location.trim().is_empty())
        .or_else(|| location_in(context.request_text()));

    SearchRequest {
        query,
        location,
        level: attachments.level.clone().unwrap_or_else(|| "mid".to_string()),
        remote_ok: attachments.remote_ok.unwrap_or(true) || request_mentions(context, &["remote"]),
    }
}

/// Place named after the last " in " or " near " of the request.
fn location_in(text: &str) -> Option<String> {
    let lowered = text.to_ascii_lowercase();
    let start = [" in ", " near "]
        .iter()
        .filter_map(|marker| lowered.rfind(marker).map(|index| index + marker.len()))
        .max()?;
    let place = text[start..]
        .split(|character: char| matches!(character, ',' | '.' | '?' | '!' | ';'))
        .next()
        .unwrap_or_default()
        .trim();
    (!place.is_empty()).then(|| truncate(place, 80).to_string())
}

#[derive(Deserialize)]
struct ListingReply {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    salary_range: Option<String>,
    #[serde(default)]
    remote_friendly: Option<bool>,
    #[serde(default)]
    match_score: Option<f64>,
    #[serde(default)]
    experience_level: Option<String>,
    #[serde(default)]
    key_skills: Vec<String>,
}

fn normalize_listings(replies: Vec<ListingReply>, request: &SearchRequest) -> Vec<JobListing> {
    let non_empty = |value: Option<String>| value.filter(|text| !text.trim().is_empty());
    let mut listings: Vec<JobListing> = replies
        .into_iter()
        .map(|reply| JobListing {
            title: non_empty(reply.title).unwrap_or_else(|| "Unknown Role".to_string()),
            company: non_empty(reply.company).unwrap_or_else(|| "Unknown Company".to_string()),
            location: non_empty(reply.location)
                .or_else(|| request.location.clone())
                .unwrap_or_default(),
            description: reply.description.unwrap_or_default(),
            url: non_empty(reply.url),
            salary_range: non_empty(reply.salary_range),
            remote_friendly: reply.remote_friendly.unwrap_or(false),
            match_score: round2(
                reply.match_score.filter(|score| !score.is_nan()).unwrap_or(DEFAULT_MATCH_SCORE).clamp(0.0, 1.0),
            ),
            experience_level: non_empty(reply.experience_level).unwrap_or_else(|| request.level.clone()),
            key_skills: reply.key_skills,
        })
        .collect();

    listings.sort_by(|left, right| right.match_score.total_cmp(&left.match_score));
    listings.truncate(LISTING_COUNT);
    listings
}

fn fallback_listings(request: &SearchRequest) -> Vec<JobListing> {
    let level_label = title_case(&request.level);
    let location = request.location.clone().unwrap_or_default();
    vec![
        JobListing {
            title: format!("{level_label} {}", request.query),
            company: "Tech Company".to_string(),
            location: location.clone(),
            description: format!(
                "Seeking a motivated {}-level professional for a {} role. Competitive salary and benefits.",
                request.level, request.query
            ),
            url: None,
            salary_range: Some("Competitive".to_string()),
            remote_friendly: request.remote_ok,
            match_score: 0.5,
            experience_level: request.level.clone(),
            key_skills: Vec::new(),
        },
        JobListing {
            title: format!("{} ({level_label})", request.query),
            company: "Growing Startup".to_string(),
            location: if request.remote_ok { "Remote".to_string() } else { location },
            description: format!(
                "Join our team as a {}. We're looking for {}-level talent to help us scale.",
                request.query, request.level
            ),
            url: None,
            salary_range: Some("Competitive".to_string()),
            remote_friendly: request.remote_ok,
            match_score: 0.4,
            experience_level: request.level.clone(),
            key_skills: Vec::new(),
        },
    ]
}

fn title_case(word: &str) -> String {
    let mut characters = word.chars();
    match characters.next() {
        Some(first) => first.to_uppercase().chain(characters.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
