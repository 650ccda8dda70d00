//! Capability agents registered with the orchestration graph.

use careercoach_core::domain::intent::IntentLabel;
use careercoach_core::errors::{ApplicationError, DomainError};
use careercoach_core::{CapabilityError, Context};

pub mod interview;
pub mod jobs;
pub mod knowledge;
pub mod memory;
pub mod resume;

pub use interview::InterviewCapability;
pub use jobs::JobsCapability;
pub use knowledge::KnowledgeCapability;
pub use memory::MemoryCapability;
pub use resume::ResumeCapability;

/// Fine-grained label the router chose, or `Unknown` on a detached Context.
pub(crate) fn routed_label(context: &Context) -> IntentLabel {
    context.intent().map_or(IntentLabel::Unknown, |decision| decision.label)
}

pub(crate) fn request_mentions(context: &Context, needles: &[&str]) -> bool {
    let lowered = context.request_text().to_lowercase();
    needles.iter().any(|needle| lowered.contains(needle))
}

/// Service-layer failures seen from inside a capability node.
pub(crate) fn from_application(error: ApplicationError) -> CapabilityError {
    match error {
        ApplicationError::Domain(DomainError::Session(error)) => CapabilityError::Rejected(error.to_string()),
        ApplicationError::Persistence(message) => CapabilityError::Persistence(message),
        ApplicationError::Validation(message) | ApplicationError::NotFound(message) => {
            CapabilityError::Rejected(message)
        }
        other => CapabilityError::Backend(other.to_string()),
    }
}

/// Rounds to two decimals.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
