pub mod capability;
pub mod engine;
pub mod executor;
pub mod states;

pub use capability::{
    Capability, CapabilityError, CapabilityRegistry, FanOut, FanOutError, Responder,
};
pub use engine::{CareerCoachGraph, GraphDefinition, GraphEngine, GraphTransitionError};
pub use executor::{Orchestrator, TraversalOutcome};
pub use states::{GraphAction, GraphEvent, GraphFlags, GraphState, TransitionOutcome};
