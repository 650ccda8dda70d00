//! Agent runtime for the career coach.
//!
//! This crate turns the pure orchestration model in `careercoach-core` into a
//! running system:
//! - capability agents for resume feedback, interview practice, job search,
//!   knowledge retrieval and turn persistence (`capabilities`)
//! - intent classifiers backing the Router (`conversation`)
//! - generation, retrieval and geolocation backends (`llm`, `retrieval`, `geo`)
//! - the interview Session Manager (`session`) and Background Task Runner (`tasks`)
//! - [`CoachRuntime`], the entry points transports call (`runtime`)
//!
//! # Principle
//!
//! The model only produces text. Routing, session cursors, retry policy and
//! every state transition are decided by deterministic code in core.

pub mod capabilities;
pub mod conversation;
pub mod geo;
pub mod llm;
pub mod responder;
pub mod retrieval;
pub mod runtime;
pub mod session;
pub mod tasks;

pub use runtime::{CoachRuntime, CoachRuntimeBuilder, CoachStores, NewApplication, TurnReply, TurnRequest};
pub use tasks::{JobError, JobHandler, TaskRunner, TaskStatus, RESUME_AUDIT_JOB};
