//! `CoachRuntime`: the entry points transports call.
//!
//! A turn is one traversal of the orchestration graph. Jobs go to the task
//! runner and are polled by id. Interview and application operations are
//! also exposed directly for clients that drive them without free text.

use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use careercoach_core::audit::{AuditSink, NoopAuditSink};
use careercoach_core::config::{AppConfig, ClassifierKind};
use careercoach_core::context::{ContextError, TurnAttachments, TurnInput};
use careercoach_core::domain::application::{
    ApplicationChanges, ApplicationId, ApplicationStatus, JobApplication,
};
use careercoach_core::domain::intent::{Intent, IntentLabel};
use careercoach_core::domain::profile::{TurnId, TurnSummary, UserId};
use careercoach_core::domain::session::{InterviewSession, QuestionId, SessionId, SessionStatus};
use careercoach_core::domain::task::TaskId;
use careercoach_core::errors::ApplicationError;
use careercoach_core::graph::Orchestrator;
use careercoach_core::router::{IntentClassifier, IntentRouter};
use careercoach_core::{CapabilityRegistry, Context};
use careercoach_db::repositories::{
    ApplicationRepository, InMemoryApplicationRepository, InMemoryInterviewSessionRepository,
    InMemoryProfileRepository, InMemoryTaskRepository, InMemoryTurnRepository,
    InterviewSessionRepository, ProfileRepository, SqlApplicationRepository,
    SqlInterviewSessionRepository, SqlProfileRepository, SqlTaskRepository, SqlTurnRepository,
    TaskRepository, TurnRepository,
};
use careercoach_db::DbPool;

use crate::capabilities::{
    InterviewCapability, JobsCapability, KnowledgeCapability, MemoryCapability, ResumeCapability,
};
use crate::conversation::{KeywordIntentClassifier, LlmIntentClassifier};
use crate::geo::{GeoLocator, OsmGeoLocator, StaticGeoLocator};
use crate::llm::{build_llm_client, LlmClient};
use crate::responder::CoachResponder;
use crate::retrieval::{InMemoryKnowledgeIndex, KnowledgeSearch};
use crate::session::{SessionManager, StartRequest, StartedSession, SubmissionOutcome};
use crate::tasks::{JobHandler, ResumeAuditJob, TaskRunner, TaskStatus};

/// Durable store handles shared by every component.
#[derive(Clone)]
pub struct CoachStores {
    pub profiles: Arc<dyn ProfileRepository>,
    pub turns: Arc<dyn TurnRepository>,
    pub applications: Arc<dyn ApplicationRepository>,
    pub sessions: Arc<dyn InterviewSessionRepository>,
    pub tasks: Arc<dyn TaskRepository>,
}

impl CoachStores {
    pub fn sqlite(pool: DbPool) -> Self {
        Self {
            profiles: Arc::new(SqlProfileRepository::new(pool.clone())),
            turns: Arc::new(SqlTurnRepository::new(pool.clone())),
            applications: Arc::new(SqlApplicationRepository::new(pool.clone())),
            sessions: Arc::new(SqlInterviewSessionRepository::new(pool.clone())),
            tasks: Arc::new(SqlTaskRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            profiles: Arc::new(InMemoryProfileRepository::default()),
            turns: Arc::new(InMemoryTurnRepository::default()),
            applications: Arc::new(InMemoryApplicationRepository::default()),
            sessions: Arc::new(InMemoryInterviewSessionRepository::default()),
            tasks: Arc::new(InMemoryTaskRepository::default()),
        }
    }
}

/// Wires the runtime from config. Backends left unset are built from the
/// config (`llm`, `geo`, `router.classifier`) or defaulted (bundled corpus).
pub struct CoachRuntimeBuilder {
    config: AppConfig,
    stores: CoachStores,
    llm: Option<Arc<dyn LlmClient>>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
    geo: Option<Arc<dyn GeoLocator>>,
    audit_sink: Arc<dyn AuditSink>,
    extra_jobs: Vec<Arc<dyn JobHandler>>,
}

impl CoachRuntimeBuilder {
    pub fn new(config: AppConfig, stores: CoachStores) -> Self {
        Self {
            config,
            stores,
            llm: None,
            classifier: None,
            knowledge: None,
            geo: None,
            audit_sink: Arc::new(NoopAuditSink),
            extra_jobs: Vec::new(),
        }
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn knowledge(mut self, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn geo(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn job(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.extra_jobs.push(handler);
        self
    }

    /// Must be called inside a tokio runtime: task workers are spawned here.
    pub fn build(self) -> Result<CoachRuntime> {
        let Self { config, stores, llm, classifier, knowledge, geo, audit_sink, extra_jobs } = self;

        let llm = match llm {
            Some(llm) => llm,
            None => build_llm_client(&config.llm)?,
        };
        let classifier: Arc<dyn IntentClassifier> = match (classifier, config.router.classifier) {
            (Some(classifier), _) => classifier,
            (None, ClassifierKind::Keyword) => Arc::new(KeywordIntentClassifier::new()),
            (None, ClassifierKind::Llm) => Arc::new(
                LlmIntentClassifier::new(llm.clone()).with_fallback(Arc::new(KeywordIntentClassifier::new())),
            ),
        };
        let knowledge =
            knowledge.unwrap_or_else(|| Arc::new(InMemoryKnowledgeIndex::with_career_corpus()));
        let geo: Arc<dyn GeoLocator> = match geo {
            Some(geo) => geo,
            None if config.geo.enabled => Arc::new(OsmGeoLocator::new(&config.geo)?),
            None => Arc::new(StaticGeoLocator::disabled()),
        };

        let sessions = Arc::new(SessionManager::new(
            stores.sessions.clone(),
            stores.profiles.clone(),
            llm.clone(),
            config.interview.clone(),
        ));

        let registry = CapabilityRegistry::new()
            .with(Arc::new(ResumeCapability::new(llm.clone())))
            .with(Arc::new(InterviewCapability::new(sessions.clone())))
            .with(Arc::new(JobsCapability::new(
                llm.clone(),
                geo,
                stores.applications.clone(),
                config.geo.search_radius_m,
            )))
            .with(Arc::new(KnowledgeCapability::new(llm, knowledge, config.knowledge.top_k)))
            .with(Arc::new(MemoryCapability::new(stores.profiles.clone(), stores.turns.clone())));

        let orchestrator = Arc::new(Orchestrator::new(
            IntentRouter::new(classifier, config.router.clone()),
            registry,
            Arc::new(CoachResponder),
            audit_sink.clone(),
            config.orchestration.clone(),
        ));

        let mut jobs: Vec<Arc<dyn JobHandler>> = vec![Arc::new(ResumeAuditJob::new(orchestrator.clone()))];
        jobs.extend(extra_jobs);
        let tasks = Arc::new(TaskRunner::start(stores.tasks.clone(), jobs, config.tasks.clone(), audit_sink));

        tracing::info!(
            event_name = "system.runtime.built",
            classifier = orchestrator.router().classifier_name(),
            capabilities = orchestrator.registry().len(),
            job_kinds = ?tasks.job_kinds(),
        );

        Ok(CoachRuntime { config, stores, orchestrator, sessions, tasks })
    }
}

/// One user turn as received from a transport.
#[derive(Clone, Debug, Default)]
pub struct TurnRequest {
    pub request_text: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub attachments: TurnAttachments,
    pub correlation_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TurnReply {
    pub response: String,
    pub session_id: SessionId,
    pub correlation_id: String,
    pub intent: Intent,
    pub label: IntentLabel,
    pub confidence: f64,
    pub clarification_required: bool,
    pub path: Vec<&'static str>,
    pub errors: Vec<ContextError>,
    pub turn_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewApplication {
    pub user_id: UserId,
    pub company_name: String,
    pub position_title: String,
    pub job_url: Option<String>,
    pub status: Option<ApplicationStatus>,
    pub application_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

pub struct CoachRuntime {
    config: AppConfig,
    stores: CoachStores,
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionManager>,
    tasks: Arc<TaskRunner>,
}

impl CoachRuntime {
    pub fn builder(config: AppConfig, stores: CoachStores) -> CoachRuntimeBuilder {
        CoachRuntimeBuilder::new(config, stores)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn tasks(&self) -> &Arc<TaskRunner> {
        &self.tasks
    }

    pub fn classifier_name(&self) -> &'static str {
        self.orchestrator.router().classifier_name()
    }

    /// Runs one traversal. Always yields a response unless the request
    /// itself is malformed.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnReply, ApplicationError> {
        let request_text = request.request_text.trim();
        if request_text.is_empty() {
            return Err(ApplicationError::Validation("request_text must not be empty".to_string()));
        }
        let user_id = UserId(non_empty(&request.user_id, "user_id")?);
        let session_id = match request.session_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => SessionId(id.to_string()),
            _ => SessionId(Uuid::new_v4().to_string()),
        };
        let correlation_id = request.correlation_id.unwrap_or_else(|| format!("turn-{}", Uuid::new_v4()));

        let history = self.history(&session_id, &correlation_id).await;
        let active_flow = self.active_flow(&session_id, &user_id, &correlation_id).await;

        let context = Context::new(TurnInput {
            request_text: request_text.to_string(),
            user_id,
            session_id: session_id.clone(),
            attachments: request.attachments,
            correlation_id: correlation_id.clone(),
        })
        .with_history(history)
        .with_active_flow(active_flow);

        let outcome = self.orchestrator.traverse(context).await;
        let response = outcome.response().to_string();
        let context = outcome.context;

        let turn_id = context.persistence().map(|receipt| receipt.turn_id.clone());
        if let Some(turn_id) = &turn_id {
            if let Err(error) = self.stores.turns.attach_response(&TurnId(turn_id.clone()), &response).await {
                tracing::warn!(
                    event_name = "turn.response.persist_failed",
                    correlation_id = %correlation_id,
                    turn_id = %turn_id,
                    error = %error,
                );
            }
        }

        let decision = context.intent().cloned();
        tracing::info!(
            event_name = "turn.completed",
            correlation_id = %correlation_id,
            session_id = %session_id.0,
            intent = ?decision.as_ref().map(|decision| decision.intent),
            error_count = context.errors().len(),
        );

        Ok(TurnReply {
            response,
            session_id,
            correlation_id,
            intent: decision.as_ref().map_or(Intent::Unknown, |decision| decision.intent),
            label: decision.as_ref().map_or(IntentLabel::Unknown, |decision| decision.label),
            confidence: decision.as_ref().map_or(0.0, |decision| decision.confidence),
            clarification_required: context.clarification_required(),
            path: outcome.path.iter().map(|state| state.as_str()).collect(),
            errors: context.errors().to_vec(),
            turn_id,
        })
    }

    pub async fn submit_job(
        &self,
        kind: &str,
        payload: Value,
        correlation_id: &str,
    ) -> Result<TaskId, ApplicationError> {
        self.tasks.submit(kind, payload, correlation_id).await
    }

    pub async fn job_status(&self, task_id: &TaskId) -> Result<TaskStatus, ApplicationError> {
        self.tasks.status(task_id).await
    }

    pub async fn start_interview(&self, request: StartRequest) -> Result<StartedSession, ApplicationError> {
        self.sessions.start(request).await
    }

    pub async fn submit_interview_answer(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
        answer: &str,
    ) -> Result<SubmissionOutcome, ApplicationError> {
        self.sessions.submit_answer(session_id, question_id, answer).await
    }

    pub async fn interview(&self, session_id: &SessionId) -> Result<InterviewSession, ApplicationError> {
        self.sessions.get(session_id).await
    }

    pub async fn create_application(&self, new: NewApplication) -> Result<JobApplication, ApplicationError> {
        let company_name = non_empty(&new.company_name, "company_name")?;
        let position_title = non_empty(&new.position_title, "position_title")?;
        let now = Utc::now();
        self.stores.profiles.ensure_exists(&new.user_id, now).await?;

        let application = JobApplication {
            id: ApplicationId(Uuid::new_v4().to_string()),
            user_id: new.user_id,
            company_name,
            position_title,
            job_url: new.job_url,
            status: new.status.unwrap_or(ApplicationStatus::Applied),
            application_date: new.application_date.unwrap_or_else(|| now.date_naive()),
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };
        self.stores.applications.save(application.clone()).await?;
        Ok(application)
    }

    pub async fn application(&self, id: &ApplicationId) -> Result<JobApplication, ApplicationError> {
        self.stores
            .applications
            .find(id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("application `{}`", id.0)))
    }

    pub async fn applications(
        &self,
        user_id: &UserId,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<JobApplication>, ApplicationError> {
        Ok(self.stores.applications.list_for_user(user_id, status).await?)
    }

    pub async fn update_application(
        &self,
        id: &ApplicationId,
        changes: ApplicationChanges,
    ) -> Result<JobApplication, ApplicationError> {
        let mut application = self.application(id).await?;
        application.apply_changes(changes, Utc::now());
        self.stores.applications.save(application.clone()).await?;
        Ok(application)
    }

    pub async fn delete_application(&self, id: &ApplicationId) -> Result<(), ApplicationError> {
        if self.stores.applications.delete(id).await? {
            Ok(())
        } else {
            Err(ApplicationError::NotFound(format!("application `{}`", id.0)))
        }
    }

    pub fn shutdown(&self) {
        self.tasks.shutdown();
    }

    async fn history(&self, session_id: &SessionId, correlation_id: &str) -> Vec<TurnSummary> {
        match self.stores.turns.recent_for_session(session_id, self.config.router.history_window).await {
            Ok(turns) => turns.iter().map(TurnSummary::from).collect(),
            Err(error) => {
                tracing::warn!(
                    event_name = "turn.history.load_failed",
                    correlation_id,
                    session_id = %session_id.0,
                    error = %error,
                );
                Vec::new()
            }
        }
    }

    async fn active_flow(&self, session_id: &SessionId, user_id: &UserId, correlation_id: &str) -> Option<Intent> {
        match self.sessions.latest_for_conversation(session_id).await {
            Ok(Some((_, session))) if session.status == SessionStatus::InProgress && session.user_id == *user_id => {
                Some(Intent::Interview)
            }
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(
                    event_name = "turn.session.load_failed",
                    correlation_id,
                    session_id = %session_id.0,
                    error = %error,
                );
                None
            }
        }
    }
}

impl Drop for CoachRuntime {
    fn drop(&mut self) {
        self.tasks.shutdown();
    }
}

fn non_empty(value: &str, field: &str) -> Result<String, ApplicationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ApplicationError::Validation(format!("{field} must not be empty")))
    } else {
        Ok(trimmed.to_string())
    }
}
