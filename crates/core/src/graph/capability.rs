//! The uniform capability interface, the static registry and bounded fan-out.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

use crate::context::{CapabilityKind, Context, ContextField, ContextPatch, ErrorClass, ErrorReason};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FanOutError {
    #[error("{caller:?} cannot consult {callee:?}: nested invocations may not fan out again")]
    DepthExceeded { caller: CapabilityKind, callee: CapabilityKind },
    #[error("{0:?} cannot consult itself")]
    SelfConsult(CapabilityKind),
    #[error("memory runs once per traversal and cannot be consulted")]
    MemoryNotConsultable,
    #[error("no capability registered for {0:?}")]
    Unregistered(CapabilityKind),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("missing required input: {0}")]
    MissingInput(String),
    #[error("backend call failed: {0}")]
    Backend(String),
    #[error("backend output could not be parsed: {0}")]
    Unparsable(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    FanOut(#[from] FanOutError),
    #[error("context contract violated: {0}")]
    Contract(String),
    #[error("capability exceeded its deadline")]
    Timeout,
}

impl CapabilityError {
    /// Failures worth retrying inside a background job attempt loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Persistence(_) | Self::Timeout)
    }

    pub fn reason(&self) -> Option<ErrorReason> {
        match self {
            Self::MissingInput(field) => Some(ErrorReason::MissingInput { field: field.clone() }),
            Self::Rejected(detail) => Some(ErrorReason::Rejected { detail: detail.clone() }),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Persistence(_) => ErrorClass::PersistenceFailure,
            Self::Timeout => ErrorClass::Timeout,
            Self::FanOut(_) | Self::Contract(_) => ErrorClass::ContractViolation,
            Self::MissingInput(_) | Self::Backend(_) | Self::Unparsable(_) | Self::Rejected(_) => {
                ErrorClass::CapabilityFailure
            }
        }
    }
}

/// A capability agent: reads the Context, returns a patch of the fields it owns.
#[async_trait]
pub trait Capability: Send + Sync {
    fn kind(&self) -> CapabilityKind;

    fn consumes(&self) -> &'static [ContextField];

    fn produces(&self) -> &'static [ContextField];

    async fn run(
        &self,
        context: &Context,
        fan_out: &FanOut<'_>,
    ) -> Result<ContextPatch, CapabilityError>;
}

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<CapabilityKind, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        self.register(capability);
        self
    }

    /// Registers `capability` under its kind, replacing any previous entry.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities.insert(capability.kind(), capability);
    }

    pub fn get(&self, kind: CapabilityKind) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<CapabilityKind> {
        self.capabilities.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

/// Handle passed to a running capability for same-turn read-only lookups.
///
/// Top-level handles may consult one other capability at a time; the handle
/// given to the callee refuses every consultation, capping depth at 1.
pub struct FanOut<'a> {
    registry: &'a CapabilityRegistry,
    caller: CapabilityKind,
    nested: bool,
    recorded: Mutex<Vec<(CapabilityKind, ContextPatch)>>,
}

impl<'a> FanOut<'a> {
    pub fn top_level(registry: &'a CapabilityRegistry, caller: CapabilityKind) -> Self {
        Self { registry, caller, nested: false, recorded: Mutex::new(Vec::new()) }
    }

    fn nested(registry: &'a CapabilityRegistry, caller: CapabilityKind) -> Self {
        Self { registry, caller, nested: true, recorded: Mutex::new(Vec::new()) }
    }

    pub fn caller(&self) -> CapabilityKind {
        self.caller
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Runs `callee` against the same Context and returns its patch. The patch
    /// is also recorded so the executor can apply it under the callee's name.
    pub async fn consult(
        &self,
        callee: CapabilityKind,
        context: &Context,
    ) -> Result<ContextPatch, CapabilityError> {
        if self.nested {
            return Err(FanOutError::DepthExceeded { caller: self.caller, callee }.into());
        }
        if callee == self.caller {
            return Err(FanOutError::SelfConsult(callee).into());
        }
        if callee == CapabilityKind::Memory {
            return Err(FanOutError::MemoryNotConsultable.into());
        }
        let capability = self.registry.get(callee).ok_or(FanOutError::Unregistered(callee))?;

        let inner = FanOut::nested(self.registry, callee);
        let patch = capability.run(context, &inner).await?;

        match self.recorded.lock() {
            Ok(mut recorded) => recorded.push((callee, patch.clone())),
            Err(poisoned) => poisoned.into_inner().push((callee, patch.clone())),
        }
        Ok(patch)
    }

    pub fn into_recorded(self) -> Vec<(CapabilityKind, ContextPatch)> {
        match self.recorded.into_inner() {
            Ok(recorded) => recorded,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Renders the final reply from a finished Context. Must always produce text.
pub trait Responder: Send + Sync {
    fn render(&self, context: &Context) -> String;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{
        Capability, CapabilityError, CapabilityRegistry, FanOut, FanOutError,
    };
    use crate::context::{
        CapabilityKind, Context, ContextField, ContextPatch, TurnAttachments, TurnInput,
    };
    use crate::domain::payload::KnowledgeAnswer;
    use crate::domain::profile::UserId;
    use crate::domain::session::SessionId;

    struct Echo(CapabilityKind);

    #[async_trait]
    impl Capability for Echo {
        fn kind(&self) -> CapabilityKind {
            self.0
        }

        fn consumes(&self) -> &'static [ContextField] {
            &[ContextField::RequestText]
        }

        fn produces(&self) -> &'static [ContextField] {
            &[ContextField::KnowledgeAnswer]
        }

        async fn run(
            &self,
            context: &Context,
            fan_out: &FanOut<'_>,
        ) -> Result<ContextPatch, CapabilityError> {
            if fan_out.is_nested() {
                // Nested callees attempting another hop must be refused.
                let refused = fan_out.consult(CapabilityKind::Resume, context).await;
                assert!(matches!(
                    refused,
                    Err(CapabilityError::FanOut(FanOutError::DepthExceeded { .. }))
                ));
            }
            Ok(ContextPatch {
                knowledge: Some(KnowledgeAnswer {
                    query: context.request_text().to_string(),
                    answer: "Use reverse-chronological order.".to_string(),
                    sources: Vec::new(),
                    confidence: 0.9,
                    related_topics: Vec::new(),
                    passages: Vec::new(),
                }),
                ..ContextPatch::default()
            })
        }
    }

    fn context() -> Context {
        Context::new(TurnInput {
            request_text: "resume format".to_string(),
            user_id: UserId("user-1".to_string()),
            session_id: SessionId("session-1".to_string()),
            attachments: TurnAttachments::default(),
            correlation_id: "req-1".to_string(),
        })
    }

    #[tokio::test]
    async fn consult_records_callee_patch_once() {
        let registry = CapabilityRegistry::new().with(Arc::new(Echo(CapabilityKind::Knowledge)));
        let fan_out = FanOut::top_level(&registry, CapabilityKind::Resume);

        let patch = fan_out
            .consult(CapabilityKind::Knowledge, &context())
            .await
            .expect("knowledge consult");
        assert!(patch.knowledge.is_some());

        let recorded = fan_out.into_recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, CapabilityKind::Knowledge);
    }

    #[tokio::test]
    async fn self_memory_and_unregistered_consults_are_refused() {
        let registry = CapabilityRegistry::new().with(Arc::new(Echo(CapabilityKind::Knowledge)));
        let fan_out = FanOut::top_level(&registry, CapabilityKind::Knowledge);
        let context = context();

        assert_eq!(
            fan_out.consult(CapabilityKind::Knowledge, &context).await,
            Err(CapabilityError::FanOut(FanOutError::SelfConsult(CapabilityKind::Knowledge)))
        );
        assert_eq!(
            fan_out.consult(CapabilityKind::Memory, &context).await,
            Err(CapabilityError::FanOut(FanOutError::MemoryNotConsultable))
        );
        assert_eq!(
            fan_out.consult(CapabilityKind::Jobs, &context).await,
            Err(CapabilityError::FanOut(FanOutError::Unregistered(CapabilityKind::Jobs)))
        );
        assert!(fan_out.into_recorded().is_empty());
    }

    #[test]
    fn transient_classification() {
        assert!(CapabilityError::Backend("503".to_string()).is_transient());
        assert!(CapabilityError::Timeout.is_transient());
        assert!(!CapabilityError::Unparsable("not json".to_string()).is_transient());
        assert!(!CapabilityError::MissingInput("resume_text".to_string()).is_transient());
    }
}
