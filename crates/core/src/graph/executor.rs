//! Async traversal of the orchestration graph for one turn.

use std::sync::Arc;

use tokio::time::{timeout, timeout_at, Instant};

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::config::OrchestrationConfig;
use crate::context::{CapabilityKind, Context, ErrorClass, Writer};
use crate::domain::intent::IntentDecision;
use crate::graph::capability::{CapabilityError, CapabilityRegistry, FanOut, Responder};
use crate::graph::engine::{CareerCoachGraph, GraphEngine};
use crate::graph::states::{GraphEvent, GraphFlags, GraphState};
use crate::router::IntentRouter;

#[derive(Clone, Debug)]
pub struct TraversalOutcome {
    pub context: Context,
    pub path: Vec<GraphState>,
}

impl TraversalOutcome {
    pub fn response(&self) -> &str {
        self.context.response().unwrap_or_default()
    }
}

pub struct Orchestrator {
    engine: GraphEngine<CareerCoachGraph>,
    router: IntentRouter,
    registry: CapabilityRegistry,
    responder: Arc<dyn Responder>,
    audit_sink: Arc<dyn AuditSink>,
    config: OrchestrationConfig,
}

impl Orchestrator {
    pub fn new(
        router: IntentRouter,
        registry: CapabilityRegistry,
        responder: Arc<dyn Responder>,
        audit_sink: Arc<dyn AuditSink>,
        config: OrchestrationConfig,
    ) -> Self {
        Self { engine: GraphEngine::default(), router, registry, responder, audit_sink, config }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    /// Walks ROUTER -> capability -> MEMORY -> RESPOND. Always returns a
    /// Context with a response, whatever failed on the way.
    pub async fn traverse(&self, mut context: Context) -> TraversalOutcome {
        let deadline = Instant::now() + self.config.traversal_timeout();
        let audit = AuditContext::new(
            Some(context.session_id().clone()),
            Some(context.user_id().clone()),
            context.correlation_id(),
            "graph",
        );
        let mut flags = GraphFlags::default();
        let mut state = self.engine.initial_state();
        let mut path = vec![state];

        while !state.is_terminal() {
            let event = match state {
                GraphState::Router => self.run_router(&mut context, deadline, &mut flags, &audit).await,
                GraphState::Memory => self.run_memory(&mut context, &audit).await,
                GraphState::Respond => break,
                GraphState::Resume
                | GraphState::Interview
                | GraphState::Jobs
                | GraphState::Knowledge => {
                    let Some(kind) = state.capability() else { break };
                    self.run_capability_node(kind, &mut context, deadline, &mut flags, &audit)
                        .await
                }
            };

            match self.engine.apply_with_audit(&state, &event, &flags, self.audit_sink.as_ref(), &audit)
            {
                Ok(outcome) => state = outcome.to,
                Err(error) => {
                    context.record_error("graph", ErrorClass::ContractViolation, error.to_string());
                    state = match state {
                        GraphState::Memory => GraphState::Respond,
                        _ => GraphState::Memory,
                    };
                }
            }
            path.push(state);
        }

        let response = self.responder.render(&context);
        if let Err(error) = context.set_response(response) {
            context.record_error("respond", ErrorClass::ContractViolation, error.to_string());
        }
        self.audit_sink.emit(
            audit
                .event("graph.traversal_completed", AuditCategory::Graph, AuditOutcome::Success)
                .with_metadata("path", render_path(&path))
                .with_metadata("error_count", context.errors().len().to_string()),
        );

        TraversalOutcome { context, path }
    }

    /// Runs a single capability outside the graph on a dedicated Context, as
    /// background jobs do. Errors are returned to the caller.
    pub async fn run_detached(
        &self,
        kind: CapabilityKind,
        context: &mut Context,
    ) -> Result<(), CapabilityError> {
        let capability = self
            .registry
            .get(kind)
            .ok_or_else(|| CapabilityError::Contract(format!("no capability registered for {kind:?}")))?;
        let fan_out = FanOut::top_level(&self.registry, kind);
        let patch = capability.run(context, &fan_out).await?;
        for (callee, nested) in fan_out.into_recorded() {
            context
                .apply_patch(Writer::Capability(callee), nested)
                .map_err(|error| CapabilityError::Contract(error.to_string()))?;
        }
        context
            .apply_patch(Writer::Capability(kind), patch)
            .map_err(|error| CapabilityError::Contract(error.to_string()))
    }

    async fn run_router(
        &self,
        context: &mut Context,
        deadline: Instant,
        flags: &mut GraphFlags,
        audit: &AuditContext,
    ) -> GraphEvent {
        let classified = timeout_at(
            deadline,
            self.router.classify(
                context.request_text(),
                context.recent_history(self.router.config().history_window),
                context.active_flow(),
            ),
        )
        .await;

        let decision = match classified {
            Ok(decision) => decision,
            Err(_) => {
                flags.deadline_exceeded = true;
                context.record_error(
                    "router",
                    ErrorClass::Timeout,
                    "traversal deadline exceeded during classification",
                );
                IntentDecision::unknown(0.0, "classification timed out")
            }
        };
        let intent = decision.intent;
        flags.clarification_required = decision.clarification_required;
        let outcome =
            if decision.clarification_required { AuditOutcome::Rejected } else { AuditOutcome::Success };
        self.audit_sink.emit(
            audit
                .event("router.intent_resolved", AuditCategory::Routing, outcome)
                .with_metadata("intent", intent.as_str())
                .with_metadata("label", decision.label.as_str())
                .with_metadata("confidence", format!("{:.2}", decision.confidence)),
        );

        if let Err(error) = context.set_intent(decision) {
            context.record_error("router", ErrorClass::ContractViolation, error.to_string());
        }
        if flags.deadline_exceeded {
            GraphEvent::DeadlineExceeded
        } else {
            GraphEvent::IntentResolved(intent)
        }
    }

    async fn run_capability_node(
        &self,
        kind: CapabilityKind,
        context: &mut Context,
        deadline: Instant,
        flags: &mut GraphFlags,
        audit: &AuditContext,
    ) -> GraphEvent {
        let Some(capability) = self.registry.get(kind) else {
            context.record_error(
                kind.as_str(),
                ErrorClass::ContractViolation,
                format!("no capability registered for {}", kind.as_str()),
            );
            return GraphEvent::CapabilityFailed;
        };

        let fan_out = FanOut::top_level(&self.registry, kind);
        let result = timeout_at(deadline, capability.run(context, &fan_out)).await;
        let nested = fan_out.into_recorded();

        let failure = match result {
            Err(_) => {
                flags.deadline_exceeded = true;
                Some(CapabilityError::Timeout)
            }
            Ok(Err(error)) => Some(error),
            Ok(Ok(patch)) => {
                let mut violation = None;
                for (callee, nested_patch) in nested {
                    if let Err(error) = context.apply_patch(Writer::Capability(callee), nested_patch)
                    {
                        violation = Some(error);
                        break;
                    }
                }
                let undeclared =
                    patch.fields().into_iter().find(|field| !capability.produces().contains(field));
                match (violation, undeclared) {
                    (Some(error), _) => Some(CapabilityError::Contract(error.to_string())),
                    (None, Some(field)) => Some(CapabilityError::Contract(format!(
                        "{} produced undeclared field {field:?}",
                        kind.as_str()
                    ))),
                    (None, None) => context
                        .apply_patch(Writer::Capability(kind), patch)
                        .err()
                        .map(|error| CapabilityError::Contract(error.to_string())),
                }
            }
        };

        match failure {
            None => {
                self.audit_sink.emit(
                    audit
                        .event("graph.node.completed", AuditCategory::Graph, AuditOutcome::Success)
                        .with_metadata("node", kind.as_str()),
                );
                GraphEvent::CapabilityFinished
            }
            Some(error) => {
                let class = error.class();
                self.audit_sink.emit(
                    audit
                        .event("graph.node.failed", AuditCategory::Graph, AuditOutcome::Failed)
                        .with_metadata("node", kind.as_str())
                        .with_metadata("error_class", class.as_str())
                        .with_metadata("error", error.to_string()),
                );
                context.record_failure(kind.as_str(), class, error.to_string(), error.reason());
                if matches!(error, CapabilityError::Timeout) {
                    GraphEvent::DeadlineExceeded
                } else {
                    GraphEvent::CapabilityFailed
                }
            }
        }
    }

    /// Memory runs on its own budget so that a traversal which blew its
    /// deadline is still persisted.
    async fn run_memory(&self, context: &mut Context, audit: &AuditContext) -> GraphEvent {
        let kind = CapabilityKind::Memory;
        let Some(capability) = self.registry.get(kind) else {
            context.record_error(
                kind.as_str(),
                ErrorClass::PersistenceFailure,
                "no memory capability registered",
            );
            return GraphEvent::PersistenceFailed;
        };

        let fan_out = FanOut::top_level(&self.registry, kind);
        let result = timeout(self.config.memory_timeout(), capability.run(context, &fan_out)).await;
        let error = match result {
            Ok(Ok(patch)) => match context.apply_patch(Writer::Capability(kind), patch) {
                Ok(()) => None,
                Err(error) => Some((ErrorClass::ContractViolation, error.to_string())),
            },
            Ok(Err(error)) => Some((ErrorClass::PersistenceFailure, error.to_string())),
            Err(_) => Some((ErrorClass::Timeout, "memory persistence timed out".to_string())),
        };

        match error {
            None => {
                self.audit_sink.emit(
                    audit
                        .event("graph.node.completed", AuditCategory::Persistence, AuditOutcome::Success)
                        .with_metadata("node", kind.as_str()),
                );
                GraphEvent::Persisted
            }
            Some((class, message)) => {
                self.audit_sink.emit(
                    audit
                        .event("graph.node.failed", AuditCategory::Persistence, AuditOutcome::Failed)
                        .with_metadata("node", kind.as_str())
                        .with_metadata("error_class", class.as_str())
                        .with_metadata("error", message.clone()),
                );
                context.record_error(kind.as_str(), class, message);
                GraphEvent::PersistenceFailed
            }
        }
    }
}

fn render_path(path: &[GraphState]) -> String {
    path.iter().map(GraphState::as_str).collect::<Vec<_>>().join(">")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::Orchestrator;
    use crate::audit::InMemoryAuditSink;
    use crate::config::{OrchestrationConfig, RouterConfig};
    use crate::context::{
        CapabilityKind, Context, ContextField, ContextPatch, ErrorClass, TurnAttachments,
        TurnInput,
    };
    use crate::domain::intent::{Intent, IntentLabel, IntentScore};
    use crate::domain::payload::{KnowledgeAnswer, PersistenceReceipt};
    use crate::domain::profile::{TurnSummary, UserId};
    use crate::domain::session::SessionId;
    use crate::graph::capability::{
        Capability, CapabilityError, CapabilityRegistry, FanOut, Responder,
    };
    use crate::graph::states::GraphState;
    use crate::router::{IntentClassifier, IntentRouter, RouterError};

    struct FixedClassifier(IntentLabel, f64);

    #[async_trait]
    impl IntentClassifier for FixedClassifier {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn score(
            &self,
            _request_text: &str,
            _recent_history: &[TurnSummary],
        ) -> Result<Vec<IntentScore>, RouterError> {
            Ok(vec![IntentScore::new(self.0, self.1, "fixed")])
        }
    }

    enum Behaviour {
        Answer,
        Fail,
        Hang,
        Undeclared,
    }

    struct Stub {
        kind: CapabilityKind,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl Capability for Stub {
        fn kind(&self) -> CapabilityKind {
            self.kind
        }

        fn consumes(&self) -> &'static [ContextField] {
            &[ContextField::RequestText]
        }

        fn produces(&self) -> &'static [ContextField] {
            match self.kind {
                CapabilityKind::Knowledge => &[ContextField::KnowledgeAnswer],
                CapabilityKind::Memory => &[ContextField::PersistenceReceipt],
                _ => &[ContextField::ResumeAnalysis],
            }
        }

        async fn run(
            &self,
            context: &Context,
            _fan_out: &FanOut<'_>,
        ) -> Result<ContextPatch, CapabilityError> {
            match self.behaviour {
                Behaviour::Fail => Err(CapabilityError::Backend("llm returned 503".to_string())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(ContextPatch::default())
                }
                Behaviour::Answer if self.kind == CapabilityKind::Memory => Ok(ContextPatch {
                    persistence: Some(PersistenceReceipt {
                        turn_id: "turn-1".to_string(),
                        persisted_at: "2026-01-01T00:00:00Z".to_string(),
                    }),
                    ..ContextPatch::default()
                }),
                Behaviour::Answer | Behaviour::Undeclared => Ok(ContextPatch {
                    knowledge: Some(KnowledgeAnswer {
                        query: context.request_text().to_string(),
                        answer: "Keep it to two pages.".to_string(),
                        sources: Vec::new(),
                        confidence: 0.8,
                        related_topics: Vec::new(),
                        passages: Vec::new(),
                    }),
                    ..ContextPatch::default()
                }),
            }
        }
    }

    struct EchoResponder;

    impl Responder for EchoResponder {
        fn render(&self, context: &Context) -> String {
            match context.knowledge() {
                Some(knowledge) => knowledge.answer.clone(),
                None => format!("fallback ({} errors)", context.errors().len()),
            }
        }
    }

    fn orchestrator(
        label: IntentLabel,
        capability: Stub,
        traversal_timeout_ms: u64,
    ) -> (Orchestrator, Arc<InMemoryAuditSink>) {
        orchestrator_with_memory(
            label,
            capability,
            Behaviour::Answer,
            OrchestrationConfig { traversal_timeout_ms, memory_timeout_ms: 1_000 },
        )
    }

    fn orchestrator_with_memory(
        label: IntentLabel,
        capability: Stub,
        memory: Behaviour,
        config: OrchestrationConfig,
    ) -> (Orchestrator, Arc<InMemoryAuditSink>) {
        let sink = Arc::new(InMemoryAuditSink::default());
        let registry = CapabilityRegistry::new()
            .with(Arc::new(capability))
            .with(Arc::new(Stub { kind: CapabilityKind::Memory, behaviour: memory }));
        let orchestrator = Orchestrator::new(
            IntentRouter::new(Arc::new(FixedClassifier(label, 0.9)), RouterConfig::default()),
            registry,
            Arc::new(EchoResponder),
            sink.clone(),
            config,
        );
        (orchestrator, sink)
    }

    fn context() -> Context {
        Context::new(TurnInput {
            request_text: "How long should my resume be?".to_string(),
            user_id: UserId("user-1".to_string()),
            session_id: SessionId("session-1".to_string()),
            attachments: TurnAttachments::default(),
            correlation_id: "req-7".to_string(),
        })
    }

    #[tokio::test]
    async fn traversal_visits_router_capability_memory_respond() {
        let (orchestrator, sink) = orchestrator(
            IntentLabel::CareerAdvice,
            Stub { kind: CapabilityKind::Knowledge, behaviour: Behaviour::Answer },
            5_000,
        );

        let outcome = orchestrator.traverse(context()).await;

        assert_eq!(
            outcome.path,
            vec![GraphState::Router, GraphState::Knowledge, GraphState::Memory, GraphState::Respond]
        );
        assert_eq!(outcome.response(), "Keep it to two pages.");
        assert_eq!(outcome.context.intent().map(|d| d.intent), Some(Intent::Knowledge));
        assert!(outcome.context.persistence().is_some());
        assert!(outcome.context.errors().is_empty());
        assert!(sink.event_types().contains(&"graph.traversal_completed".to_string()));
    }

    #[tokio::test]
    async fn failing_capability_is_captured_and_turn_still_persists() {
        let (orchestrator, _sink) = orchestrator(
            IntentLabel::ResumeAnalysis,
            Stub { kind: CapabilityKind::Resume, behaviour: Behaviour::Fail },
            5_000,
        );

        let outcome = orchestrator.traverse(context()).await;

        assert_eq!(outcome.path.last(), Some(&GraphState::Respond));
        assert!(outcome.path.contains(&GraphState::Memory));
        assert_eq!(outcome.context.errors().len(), 1);
        assert_eq!(outcome.context.errors()[0].source, "resume");
        assert_eq!(outcome.context.errors()[0].class, ErrorClass::CapabilityFailure);
        assert!(outcome.context.persistence().is_some());
        assert_eq!(outcome.response(), "fallback (1 errors)");
    }

    #[tokio::test]
    async fn deadline_cuts_capability_but_memory_and_respond_run() {
        let (orchestrator, _sink) = orchestrator(
            IntentLabel::CareerAdvice,
            Stub { kind: CapabilityKind::Knowledge, behaviour: Behaviour::Hang },
            50,
        );

        let outcome = orchestrator.traverse(context()).await;

        assert_eq!(outcome.context.errors()[0].class, ErrorClass::Timeout);
        assert!(outcome.context.persistence().is_some());
        assert!(outcome.context.response().is_some());
    }

    #[tokio::test]
    async fn undeclared_output_is_a_contract_violation() {
        let (orchestrator, _sink) = orchestrator(
            IntentLabel::ResumeAnalysis,
            Stub { kind: CapabilityKind::Resume, behaviour: Behaviour::Undeclared },
            5_000,
        );

        let outcome = orchestrator.traverse(context()).await;

        assert!(outcome.context.knowledge().is_none());
        assert_eq!(outcome.context.errors()[0].class, ErrorClass::ContractViolation);
    }

    #[tokio::test]
    async fn memory_failure_is_recorded_and_the_turn_still_responds() {
        let (orchestrator, sink) = orchestrator_with_memory(
            IntentLabel::CareerAdvice,
            Stub { kind: CapabilityKind::Knowledge, behaviour: Behaviour::Answer },
            Behaviour::Fail,
            OrchestrationConfig { traversal_timeout_ms: 5_000, memory_timeout_ms: 1_000 },
        );

        let outcome = orchestrator.traverse(context()).await;

        assert_eq!(
            outcome.path,
            vec![GraphState::Router, GraphState::Knowledge, GraphState::Memory, GraphState::Respond]
        );
        assert_eq!(outcome.context.errors().len(), 1);
        assert_eq!(outcome.context.errors()[0].source, "memory");
        assert_eq!(outcome.context.errors()[0].class, ErrorClass::PersistenceFailure);
        assert!(outcome.context.persistence().is_none());
        assert_eq!(outcome.response(), "Keep it to two pages.");
        assert!(sink.event_types().contains(&"graph.node.failed".to_string()));
    }

    #[tokio::test]
    async fn slow_memory_times_out_and_the_turn_still_responds() {
        let (orchestrator, _sink) = orchestrator_with_memory(
            IntentLabel::CareerAdvice,
            Stub { kind: CapabilityKind::Knowledge, behaviour: Behaviour::Answer },
            Behaviour::Hang,
            OrchestrationConfig { traversal_timeout_ms: 5_000, memory_timeout_ms: 50 },
        );

        let outcome = orchestrator.traverse(context()).await;

        assert_eq!(outcome.path.last(), Some(&GraphState::Respond));
        assert_eq!(outcome.context.errors().len(), 1);
        assert_eq!(outcome.context.errors()[0].source, "memory");
        assert_eq!(outcome.context.errors()[0].class, ErrorClass::Timeout);
        assert!(outcome.context.persistence().is_none());
        assert!(outcome.context.response().is_some());
    }
}
