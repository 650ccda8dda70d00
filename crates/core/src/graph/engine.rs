use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::context::CapabilityKind;
use crate::graph::states::{
    GraphAction, GraphEvent, GraphFlags, GraphState, TransitionOutcome,
};

pub trait GraphDefinition {
    fn initial_state(&self) -> GraphState;
    fn transition(
        &self,
        current: &GraphState,
        event: &GraphEvent,
        flags: &GraphFlags,
    ) -> Result<TransitionOutcome, GraphTransitionError>;
}

/// `ROUTER -> capability -> MEMORY -> RESPOND`.
#[derive(Clone, Debug, Default)]
pub struct CareerCoachGraph;

impl GraphDefinition for CareerCoachGraph {
    fn initial_state(&self) -> GraphState {
        GraphState::Router
    }

    fn transition(
        &self,
        current: &GraphState,
        event: &GraphEvent,
        flags: &GraphFlags,
    ) -> Result<TransitionOutcome, GraphTransitionError> {
        transition_career_coach(current, event, flags)
    }
}

pub struct GraphEngine<G> {
    graph: G,
}

impl<G> GraphEngine<G>
where
    G: GraphDefinition,
{
    pub fn new(graph: G) -> Self {
        Self { graph }
    }

    pub fn initial_state(&self) -> GraphState {
        self.graph.initial_state()
    }

    pub fn apply(
        &self,
        current: &GraphState,
        event: &GraphEvent,
        flags: &GraphFlags,
    ) -> Result<TransitionOutcome, GraphTransitionError> {
        self.graph.transition(current, event, flags)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &GraphState,
        event: &GraphEvent,
        flags: &GraphFlags,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, GraphTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, flags);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event("graph.transition_applied", AuditCategory::Graph, AuditOutcome::Success)
                        .with_metadata("from", outcome.from.as_str())
                        .with_metadata("to", outcome.to.as_str())
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event(
                            "graph.transition_rejected",
                            AuditCategory::Graph,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for GraphEngine<CareerCoachGraph> {
    fn default() -> Self {
        Self::new(CareerCoachGraph)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: GraphState, event: GraphEvent },
    #[error("state {0:?} is terminal")]
    Terminal(GraphState),
}

fn transition_career_coach(
    current: &GraphState,
    event: &GraphEvent,
    flags: &GraphFlags,
) -> Result<TransitionOutcome, GraphTransitionError> {
    use GraphAction::{AskClarification, InvokeCapability, Persist, Render};
    use GraphEvent::{
        CapabilityFailed, CapabilityFinished, DeadlineExceeded, IntentResolved,
        PersistenceFailed, Persisted,
    };
    use GraphState::{Interview, Jobs, Knowledge, Memory, Resume, Respond, Router};

    let (to, actions) = match (current, event) {
        (Respond, _) => return Err(GraphTransitionError::Terminal(*current)),
        (Router, IntentResolved(_)) | (Router, DeadlineExceeded) if flags.deadline_exceeded => {
            (Memory, vec![Persist])
        }
        (Router, IntentResolved(intent)) => {
            let kind = CapabilityKind::for_intent(*intent);
            let mut actions = vec![InvokeCapability(kind)];
            if flags.clarification_required {
                actions.push(AskClarification);
            }
            (GraphState::for_capability(kind), actions)
        }
        (Router, DeadlineExceeded) => (Memory, vec![Persist]),
        (Resume | Interview | Jobs | Knowledge, CapabilityFinished)
        | (Resume | Interview | Jobs | Knowledge, CapabilityFailed)
        | (Resume | Interview | Jobs | Knowledge, DeadlineExceeded) => (Memory, vec![Persist]),
        (Memory, Persisted) | (Memory, PersistenceFailed) | (Memory, DeadlineExceeded) => {
            (Respond, vec![Render])
        }
        _ => {
            return Err(GraphTransitionError::InvalidTransition {
                state: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}
