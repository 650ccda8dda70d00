//! Renders the reply text from a finished Context.

use std::fmt::Write as _;

use careercoach_core::domain::intent::Intent;
use careercoach_core::domain::payload::{
    InterviewExchange, JobSearchResult, KnowledgeAnswer, ResumeAnalysis,
};
use careercoach_core::{CapabilityKind, Context, ContextError, ErrorClass, ErrorReason, Responder};

const CLARIFY_QUESTION: &str = "Could you tell me whether you'd like help with your resume, interview practice, \
     a job search or general career advice?";
const LIST_LIMIT: usize = 5;

#[derive(Clone, Copy, Debug, Default)]
pub struct CoachResponder;

impl Responder for CoachResponder {
    fn render(&self, context: &Context) -> String {
        let intent = context.intent().map_or(Intent::Unknown, |decision| decision.intent);
        let mut reply = String::new();

        if context.clarification_required() {
            reply.push_str("I'm not completely sure what you're asking, so here is my best guess.\n\n");
        }

        let body = match intent {
            Intent::Resume => context.resume_analysis().map(render_resume),
            Intent::Interview => context.interview().map(render_interview),
            Intent::Jobs => context.job_results().map(render_jobs),
            Intent::Knowledge | Intent::Unknown => context.knowledge().map(render_knowledge),
        };
        match body {
            Some(body) => reply.push_str(&body),
            None => reply.push_str(&degraded(intent, context.errors())),
        }

        if context.clarification_required() {
            let _ = write!(reply, "\n\n{CLARIFY_QUESTION}");
        }
        if context.errors().iter().any(|error| error.class == ErrorClass::PersistenceFailure) {
            reply.push_str("\n\n(Note: this conversation turn could not be saved.)");
        }
        reply.trim().to_string()
    }
}

fn degraded(intent: Intent, errors: &[ContextError]) -> String {
    let capability_error = errors.iter().find(|error| error.source != CapabilityKind::Memory.as_str());
    match capability_error {
        Some(ContextError { reason: Some(ErrorReason::MissingInput { field }), .. }) if field == "resume_text" => {
            "Please paste the text of your resume (and optionally the job description) so I can review it."
                .to_string()
        }
        Some(ContextError { source, reason: Some(ErrorReason::Rejected { detail }), .. })
            if source == CapabilityKind::Interview.as_str() =>
        {
            format!("I couldn't record that for your interview practice: {detail}.")
        }
        Some(error) if error.class == ErrorClass::Timeout => {
            "That took longer than expected and I had to stop. Please try again in a moment.".to_string()
        }
        Some(_) => format!(
            "I wasn't able to complete the {} request right now. Please try again in a moment.",
            topic(intent)
        ),
        None => format!("I don't have anything on {} to share yet. {CLARIFY_QUESTION}", topic(intent)),
    }
}

fn topic(intent: Intent) -> &'static str {
    match intent {
        Intent::Resume => "resume",
        Intent::Interview => "interview",
        Intent::Jobs => "job search",
        Intent::Knowledge | Intent::Unknown => "career advice",
    }
}

fn bullets(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = write!(out, "\n\n{heading}:");
    for item in items.iter().take(LIST_LIMIT) {
        let _ = write!(out, "\n- {item}");
    }
}

fn render_resume(analysis: &ResumeAnalysis) -> String {
    let mut out = format!("Resume score: {:.1}/10", analysis.overall_score);
    bullets(&mut out, "Strengths", &analysis.strengths);
    bullets(&mut out, "Areas to improve", &analysis.weaknesses);
    bullets(&mut out, "Recommendations", &analysis.recommendations);
    let _ = write!(out, "\n\nATS compatibility: {}", analysis.ats_compatibility);
    bullets(&mut out, "Missing keywords", &analysis.keyword_analysis.missing);
    bullets(&mut out, "Rewritten bullet points", &analysis.improved_bullets);
    if !analysis.formatting_sources.is_empty() {
        let _ = write!(out, "\n\nFormatting guidance from: {}", analysis.formatting_sources.join(", "));
    }
    out
}

fn render_interview(exchange: &InterviewExchange) -> String {
    let mut out = String::new();

    if let Some(answered) = &exchange.answered {
        let feedback = &answered.feedback;
        let _ = write!(out, "Score: {:.1}/10", feedback.overall_score);
        if !feedback.specific_feedback.is_empty() {
            let _ = write!(out, "\n{}", feedback.specific_feedback);
        }
        bullets(&mut out, "Strengths", &feedback.strength_areas);
        bullets(&mut out, "To improve", &feedback.improvement_areas);
        if !feedback.suggested_improvement.is_empty() {
            let _ = write!(out, "\n\nTip: {}", feedback.suggested_improvement);
        }
        out.push_str("\n\n");
    } else if exchange.question_number == 1 && exchange.next_question.is_some() {
        let _ = write!(
            out,
            "Let's practice for a {} {} interview ({} questions).\n\n",
            exchange.level, exchange.role, exchange.question_count
        );
    }

    if let Some(summary) = &exchange.summary {
        let _ = write!(
            out,
            "Interview complete. Overall score: {:.1}/10 ({}).\n{}",
            summary.overall_score,
            summary.performance_level.as_str().replace('_', " "),
            summary.interview_readiness
        );
        bullets(&mut out, "Strongest areas", &summary.strongest_areas);
        bullets(&mut out, "Focus next on", &summary.weakest_areas);
        bullets(&mut out, "Next steps", &summary.next_steps);
    } else if let Some(question) = &exchange.next_question {
        let _ = write!(
            out,
            "Question {} of {} ({}, {}):\n{}",
            exchange.question_number,
            exchange.question_count,
            question.question_type.as_str(),
            question.difficulty.as_str(),
            question.text
        );
    }
    out
}

fn render_jobs(results: &JobSearchResult) -> String {
    let mut out = String::new();

    if results.listings.is_empty() {
        if results.tracked_applications.is_empty() {
            out.push_str("You are not tracking any applications yet.");
        } else {
            let _ = write!(out, "You are tracking {} application(s):", results.tracked_applications.len());
            for application in &results.tracked_applications {
                let _ = write!(
                    out,
                    "\n- {} at {}: {} (since {})",
                    application.position_title,
                    application.company_name,
                    application.status.as_str(),
                    application.application_date
                );
            }
        }
    } else {
        let place = results
            .place
            .as_ref()
            .map(|place| place.display_name.clone())
            .or_else(|| results.location.clone());
        match place {
            Some(place) => {
                let _ = write!(out, "Openings for \"{}\" near {place}:", results.query);
            }
            None => {
                let _ = write!(out, "Openings for \"{}\":", results.query);
            }
        }
        for listing in &results.listings {
            let _ = write!(
                out,
                "\n- {} at {} ({}) match {:.0}%",
                listing.title,
                listing.company,
                if listing.location.is_empty() { "location n/a" } else { &listing.location },
                listing.match_score * 100.0
            );
            if let Some(salary) = &listing.salary_range {
                let _ = write!(out, ", salary {salary}");
            }
        }
        if !results.nearby_employers.is_empty() {
            let names: Vec<&str> =
                results.nearby_employers.iter().take(LIST_LIMIT).map(|employer| employer.name.as_str()).collect();
            let _ = write!(out, "\n\nEmployers nearby: {}", names.join(", "));
        }
    }

    for note in &results.notes {
        let _ = write!(out, "\n{note}");
    }
    out
}

fn render_knowledge(answer: &KnowledgeAnswer) -> String {
    let mut out = answer.answer.clone();
    if !answer.sources.is_empty() {
        let _ = write!(out, "\n\nSources: {}", answer.sources.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use careercoach_core::context::TurnAttachments;
    use careercoach_core::domain::intent::{IntentDecision, IntentLabel};
    use careercoach_core::domain::payload::KnowledgeAnswer;
    use careercoach_core::{
        CapabilityError, CapabilityKind, ContextPatch, ErrorClass, ErrorReason, Responder, Writer,
    };

    use super::CoachResponder;
    use crate::capabilities::testing::{context, routed};

    fn knowledge(answer: &str) -> ContextPatch {
        ContextPatch {
            knowledge: Some(KnowledgeAnswer {
                query: "q".to_string(),
                answer: answer.to_string(),
                sources: vec!["star_method.md".to_string()],
                confidence: 0.7,
                related_topics: Vec::new(),
                passages: Vec::new(),
            }),
            ..ContextPatch::default()
        }
    }

    #[test]
    fn renders_the_payload_of_the_routed_capability() {
        let mut context = routed("tips", TurnAttachments::default(), IntentLabel::CareerAdvice);
        context
            .apply_patch(Writer::Capability(CapabilityKind::Knowledge), knowledge("Use STAR."))
            .expect("patch");

        let reply = CoachResponder.render(&context);
        assert!(reply.starts_with("Use STAR."));
        assert!(reply.contains("Sources: star_method.md"));
    }

    #[test]
    fn clarification_wraps_the_answer_with_a_question() {
        let mut context = context("hmm", TurnAttachments::default());
        context.set_intent(IntentDecision::unknown(0.0, "backend down")).expect("intent");
        context
            .apply_patch(Writer::Capability(CapabilityKind::Knowledge), knowledge("General guidance."))
            .expect("patch");

        let reply = CoachResponder.render(&context);
        assert!(reply.contains("General guidance."));
        assert!(reply.ends_with("general career advice?"));
    }

    #[test]
    fn failures_without_payload_still_produce_text() {
        let mut missing = routed("Review my resume", TurnAttachments::default(), IntentLabel::ResumeAnalysis);
        let error = CapabilityError::MissingInput("resume_text".to_string());
        missing.record_failure("resume", error.class(), error.to_string(), error.reason());
        assert!(CoachResponder.render(&missing).starts_with("Please paste the text of your resume"));

        let mut rejected = routed("answer", TurnAttachments::default(), IntentLabel::InterviewAnswer);
        let error = CapabilityError::Rejected(
            "interview session `s` is complete; no further answers are accepted".to_string(),
        );
        rejected.record_failure("interview", error.class(), error.to_string(), error.reason());
        rejected.record_error("memory", ErrorClass::PersistenceFailure, "database is locked");
        let reply = CoachResponder.render(&rejected);
        assert!(reply.contains("is complete"));
        assert!(reply.contains("could not be saved"));

        let empty = routed("jobs", TurnAttachments::default(), IntentLabel::JobSearch);
        assert!(!CoachResponder.render(&empty).is_empty());
    }

    #[test]
    fn degraded_reply_follows_the_failure_reason_not_its_wording() {
        let mut backend = routed("Review my resume", TurnAttachments::default(), IntentLabel::ResumeAnalysis);
        backend.record_error("resume", ErrorClass::CapabilityFailure, "llm rejected resume_text as too long");
        let reply = CoachResponder.render(&backend);
        assert!(reply.starts_with("I wasn't able to complete the resume request"), "{reply}");

        let mut missing = routed("Review my resume", TurnAttachments::default(), IntentLabel::ResumeAnalysis);
        missing.record_failure(
            "resume",
            ErrorClass::CapabilityFailure,
            "input absent",
            Some(ErrorReason::MissingInput { field: "resume_text".to_string() }),
        );
        assert!(CoachResponder.render(&missing).starts_with("Please paste the text of your resume"));

        let mut worded = routed("answer", TurnAttachments::default(), IntentLabel::InterviewAnswer);
        worded.record_error("interview", ErrorClass::CapabilityFailure, "request rejected: quota");
        let reply = CoachResponder.render(&worded);
        assert!(!reply.contains("interview practice: quota"), "{reply}");
    }
}
