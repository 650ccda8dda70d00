pub mod audit;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod graph;
pub mod router;
pub mod session;
pub mod task_engine;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use context::{
    CapabilityKind, Context, ContextError, ContextField, ContextPatch, ErrorClass, ErrorReason,
    TurnAttachments, TurnInput, Writer,
};
pub use domain::application::{ApplicationId, ApplicationStatus, JobApplication};
pub use domain::intent::{Intent, IntentDecision, IntentLabel, IntentScore};
pub use domain::profile::{TurnId, TurnRecord, TurnSummary, UserId, UserProfile};
pub use domain::session::{InterviewQuestion, InterviewSession, QuestionId, SessionId};
pub use domain::task::{BackgroundTask, TaskId, TaskState};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use graph::{Capability, CapabilityError, CapabilityRegistry, FanOut, Orchestrator, Responder};
pub use router::{IntentClassifier, IntentRouter, RouterError};
pub use session::SessionError;
pub use task_engine::{TaskEngine, TaskError};
