use serde::{Deserialize, Serialize};

use crate::context::CapabilityKind;
use crate::domain::intent::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphState {
    Router,
    Resume,
    Interview,
    Jobs,
    Knowledge,
    Memory,
    Respond,
}

impl GraphState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Resume => "resume",
            Self::Interview => "interview",
            Self::Jobs => "jobs",
            Self::Knowledge => "knowledge",
            Self::Memory => "memory",
            Self::Respond => "respond",
        }
    }

    pub fn for_capability(kind: CapabilityKind) -> Self {
        match kind {
            CapabilityKind::Resume => Self::Resume,
            CapabilityKind::Interview => Self::Interview,
            CapabilityKind::Jobs => Self::Jobs,
            CapabilityKind::Knowledge => Self::Knowledge,
            CapabilityKind::Memory => Self::Memory,
        }
    }

    /// Capability executed while the traversal sits in this state.
    pub fn capability(&self) -> Option<CapabilityKind> {
        match self {
            Self::Resume => Some(CapabilityKind::Resume),
            Self::Interview => Some(CapabilityKind::Interview),
            Self::Jobs => Some(CapabilityKind::Jobs),
            Self::Knowledge => Some(CapabilityKind::Knowledge),
            Self::Memory => Some(CapabilityKind::Memory),
            Self::Router | Self::Respond => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Respond)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphEvent {
    IntentResolved(Intent),
    CapabilityFinished,
    CapabilityFailed,
    Persisted,
    PersistenceFailed,
    DeadlineExceeded,
}

/// Context-derived flags the transition function may read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFlags {
    pub clarification_required: bool,
    pub deadline_exceeded: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphAction {
    InvokeCapability(CapabilityKind),
    AskClarification,
    Persist,
    Render,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: GraphState,
    pub to: GraphState,
    pub event: GraphEvent,
    pub actions: Vec<GraphAction>,
}
