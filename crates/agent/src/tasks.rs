//! Background Task Runner.
//!
//! `submit` stores a `queued` record and hands its id to a fixed pool of
//! workers over a channel. Every state change goes through [`TaskEngine`] and
//! is written with a version check, so two workers can never both own an
//! attempt: the loser of a claim race simply drops the task. Failed attempts
//! are retried in place (the record stays `running`) until the attempt cap,
//! and a periodic sweep re-enqueues queued work and stale claims left behind
//! by a dead worker. An id sits in the channel at most once. While a handler
//! runs, its worker refreshes the claim's heartbeat so the sweep leaves it
//! alone.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use careercoach_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use careercoach_core::config::TaskConfig;
use careercoach_core::context::{TurnAttachments, TurnInput};
use careercoach_core::domain::profile::UserId;
use careercoach_core::domain::session::SessionId;
use careercoach_core::domain::task::{BackgroundTask, TaskId, TaskState};
use careercoach_core::errors::ApplicationError;
use careercoach_core::graph::Orchestrator;
use careercoach_core::task_engine::{TaskEngine, TaskEngineConfig, TaskError, TransitionResult};
use careercoach_core::{CapabilityError, CapabilityKind, Context};
use careercoach_db::repositories::TaskRepository;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JobError {
    /// Worth another attempt (backend hiccup, timeout).
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl From<CapabilityError> for JobError {
    fn from(error: CapabilityError) -> Self {
        if error.is_transient() {
            Self::Transient(error.to_string())
        } else {
            Self::Permanent(error.to_string())
        }
    }
}

/// Body of one background job kind. Must be safe to re-run for the same task.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn run(&self, task: &BackgroundTask) -> Result<Value, JobError>;
}

/// What a poller sees.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub kind: String,
    pub state: TaskState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub result: Option<Value>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<BackgroundTask> for TaskStatus {
    fn from(task: BackgroundTask) -> Self {
        let result = task.result_json.as_deref().map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        });
        let failure_reason = (task.state == TaskState::Failed).then_some(task.last_error).flatten();
        Self {
            task_id: task.id,
            kind: task.kind,
            state: task.state,
            attempts: task.attempt_count,
            max_attempts: task.max_attempts,
            result,
            failure_reason,
            created_at: task.created_at,
            updated_at: task.updated_at,
            completed_at: task.completed_at,
        }
    }
}

struct Executor {
    engine: TaskEngine,
    tasks: Arc<dyn TaskRepository>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    config: TaskConfig,
    audit_sink: Arc<dyn AuditSink>,
}

pub struct TaskRunner {
    executor: Arc<Executor>,
    queue: mpsc::UnboundedSender<TaskId>,
    pending: Arc<Mutex<HashSet<TaskId>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRunner {
    /// Spawns `config.worker_count` workers on the current tokio runtime.
    pub fn start(
        tasks: Arc<dyn TaskRepository>,
        handlers: Vec<Arc<dyn JobHandler>>,
        config: TaskConfig,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        let executor = Arc::new(Executor {
            engine: TaskEngine::with_config(TaskEngineConfig::from(&config)),
            tasks,
            handlers: handlers.into_iter().map(|handler| (handler.kind(), handler)).collect(),
            config,
            audit_sink,
        });
        let (queue, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let pending: Arc<Mutex<HashSet<TaskId>>> = Arc::default();

        let workers = (0..executor.config.worker_count.max(1))
            .map(|index| {
                let executor = executor.clone();
                let receiver = receiver.clone();
                let pending = pending.clone();
                let worker_id = format!("worker-{}", index + 1);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(task_id) = next else { break };
                        lock_pending(&pending).remove(&task_id);
                        executor.execute(&task_id, &worker_id).await;
                    }
                    tracing::debug!(event_name = "task.worker.stopped", worker_id = %worker_id);
                })
            })
            .collect();

        Self { executor, queue, pending, background: Mutex::new(workers) }
    }

    pub fn job_kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.executor.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Stores a `queued` record and schedules it. Returns without waiting.
    pub async fn submit(
        &self,
        kind: &str,
        payload: Value,
        correlation_id: &str,
    ) -> Result<TaskId, ApplicationError> {
        if !self.executor.handlers.contains_key(kind) {
            return Err(ApplicationError::Validation(format!(
                "unknown job kind `{kind}`; expected one of: {}",
                self.job_kinds().join(", ")
            )));
        }

        let created = self.executor.engine.create_task(kind, payload.to_string(), correlation_id);
        let task_id = created.task.id.clone();
        self.executor.tasks.insert(created.task).await?;
        self.executor.tasks.append_transition(created.transition).await?;

        self.executor.audit_sink.emit(
            self.executor
                .audit(correlation_id)
                .event("task.submitted", AuditCategory::Task, AuditOutcome::Success)
                .with_metadata("task_id", task_id.0.clone())
                .with_metadata("kind", kind),
        );
        tracing::info!(event_name = "task.submitted", task_id = %task_id.0, kind, correlation_id);

        self.enqueue(task_id.clone());
        Ok(task_id)
    }

    pub async fn status(&self, task_id: &TaskId) -> Result<TaskStatus, ApplicationError> {
        self.executor
            .tasks
            .find(task_id)
            .await?
            .map(TaskStatus::from)
            .ok_or_else(|| ApplicationError::NotFound(format!("task `{}`", task_id.0)))
    }

    /// Re-enqueues queued tasks and running tasks whose heartbeat is stale,
    /// skipping ids still waiting in the channel. Returns how many were
    /// actually enqueued.
    pub async fn recover(&self) -> Result<usize, ApplicationError> {
        let queued = self.executor.tasks.list_by_state(TaskState::Queued).await?;
        let running = self.executor.tasks.list_by_state(TaskState::Running).await?;
        let stale = self.executor.engine.recover_stale_tasks(running, Utc::now());

        let count = queued.into_iter().chain(stale).filter(|task| self.enqueue(task.id.clone())).count();
        if count > 0 {
            tracing::info!(event_name = "task.recovery.requeued", count);
        }
        Ok(count)
    }

    /// Runs [`TaskRunner::recover`] every `sweep_interval`.
    pub fn spawn_recovery_sweep(self: &Arc<Self>) {
        let runner = Arc::downgrade(self);
        let period = self.executor.config.sweep_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(runner) = runner.upgrade() else { break };
                if let Err(error) = runner.recover().await {
                    tracing::warn!(event_name = "task.recovery.failed", error = %error);
                }
            }
        });
        self.background_handles().push(handle);
    }

    /// Stops workers and the sweep. Claimed tasks are left for recovery.
    pub fn shutdown(&self) {
        for handle in self.background_handles().drain(..) {
            handle.abort();
        }
    }

    /// Sends the id to the workers unless it is already waiting.
    fn enqueue(&self, task_id: TaskId) -> bool {
        if !lock_pending(&self.pending).insert(task_id.clone()) {
            return false;
        }
        if self.queue.send(task_id.clone()).is_err() {
            lock_pending(&self.pending).remove(&task_id);
            tracing::warn!(event_name = "task.enqueue.closed", task_id = %task_id.0);
            return false;
        }
        true
    }

    fn background_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.background.lock() {
            Ok(handles) => handles,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn lock_pending(pending: &Mutex<HashSet<TaskId>>) -> std::sync::MutexGuard<'_, HashSet<TaskId>> {
    match pending.lock() {
        Ok(pending) => pending,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Executor {
    fn audit(&self, correlation_id: &str) -> AuditContext {
        AuditContext::new(None, None, correlation_id, "task-runner")
    }

    async fn execute(&self, task_id: &TaskId, worker_id: &str) {
        if let Err(error) = self.try_execute(task_id, worker_id).await {
            tracing::error!(
                event_name = "task.execute.failed",
                task_id = %task_id.0,
                worker_id,
                error = %error,
            );
        }
    }

    async fn try_execute(&self, task_id: &TaskId, worker_id: &str) -> Result<(), ApplicationError> {
        let Some(stored) = self.tasks.find(task_id).await? else {
            tracing::warn!(event_name = "task.execute.missing", task_id = %task_id.0);
            return Ok(());
        };
        let expected = stored.state_version;

        let mut task = match self.engine.claim_task(stored.clone(), worker_id, Utc::now()) {
            Ok(claimed) => {
                let task = claimed.task.clone();
                if !self.persist(claimed, expected).await? {
                    return Ok(());
                }
                task
            }
            Err(TaskError::ClaimConflict(..)) | Err(TaskError::InvalidTransition { .. }) => return Ok(()),
            Err(TaskError::AttemptsExhausted { max_attempts, .. }) => {
                let reason = stored.last_error.clone().unwrap_or_else(|| {
                    format!("worker lost after {max_attempts} attempts")
                });
                let failed = self.engine.fail_task(stored, reason, "attempts_exhausted", Utc::now())?;
                self.finish(failed, expected).await?;
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        let Some(handler) = self.handlers.get(task.kind.as_str()).cloned() else {
            let expected = task.state_version;
            let reason = format!("no handler registered for job kind `{}`", task.kind);
            let failed = self.engine.fail_task(task, reason, "configuration", Utc::now())?;
            self.finish(failed, expected).await?;
            return Ok(());
        };

        tracing::info!(
            event_name = "task.attempt.started",
            task_id = %task.id.0,
            kind = %task.kind,
            attempt = task.attempt_count,
            worker_id,
            correlation_id = %task.correlation_id,
        );

        loop {
            let outcome = self.run_attempt(handler.as_ref(), &mut task, worker_id).await;
            let now = Utc::now();
            let expected = task.state_version;

            let (message, class, retryable) = match outcome {
                Some(Ok(result)) => {
                    let completed = self.engine.complete_task(task.clone(), result.to_string(), now)?;
                    return match self.finish(completed, expected).await {
                        Ok(_) => Ok(()),
                        Err(error) => {
                            let reason = format!("failed to persist job result: {error}");
                            let failed = self.engine.fail_task(task, reason, "persistence_failure", now)?;
                            self.finish(failed, expected).await.map(|_| ())
                        }
                    };
                }
                Some(Err(JobError::Permanent(message))) => (message, "permanent", false),
                Some(Err(JobError::Transient(message))) => (message, "transient", true),
                None => (
                    format!(
                        "attempt {} exceeded {}s",
                        task.attempt_count, self.config.attempt_timeout_secs
                    ),
                    "timeout",
                    true,
                ),
            };

            if !retryable || task.attempt_count >= task.max_attempts {
                let failed = self.engine.fail_task(task, message, class, now)?;
                self.finish(failed, expected).await?;
                return Ok(());
            }

            let scheduled = self.engine.retry_task(task, message.clone(), class, now)?;
            tracing::warn!(
                event_name = "task.attempt.retry",
                task_id = %scheduled.task.id.0,
                attempt = scheduled.task.attempt_count,
                max_attempts = scheduled.task.max_attempts,
                backoff_ms = u64::try_from(scheduled.backoff.as_millis()).unwrap_or(u64::MAX),
                error_class = class,
                error = %message,
            );
            let backoff = scheduled.backoff;
            let next = scheduled.task.clone();
            let transition = TransitionResult { task: scheduled.task, transition: scheduled.transition };
            if !self.persist(transition, expected).await? {
                return Ok(());
            }
            task = next;
            tokio::time::sleep(backoff).await;
        }
    }

    /// Runs one attempt under the attempt timeout, refreshing the claim's
    /// heartbeat every `heartbeat_interval`. `None` means the attempt timed out.
    /// `task` tracks the latest written version.
    async fn run_attempt(
        &self,
        handler: &dyn JobHandler,
        task: &mut BackgroundTask,
        worker_id: &str,
    ) -> Option<Result<Value, JobError>> {
        let snapshot = task.clone();
        let attempt = timeout(self.config.attempt_timeout(), handler.run(&snapshot));
        tokio::pin!(attempt);

        let period = self.config.heartbeat_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                outcome = &mut attempt => return outcome.ok(),
                _ = ticker.tick() => self.beat(task, worker_id).await,
            }
        }
    }

    async fn beat(&self, task: &mut BackgroundTask, worker_id: &str) {
        let expected = task.state_version;
        let refreshed = match self.engine.heartbeat(task.clone(), Utc::now()) {
            Ok(refreshed) => refreshed,
            Err(error) => {
                tracing::warn!(event_name = "task.heartbeat.rejected", task_id = %task.id.0, error = %error);
                return;
            }
        };
        match self.tasks.update_if_version(refreshed.clone(), expected).await {
            Ok(true) => {
                tracing::debug!(event_name = "task.heartbeat", task_id = %task.id.0, worker_id);
                *task = refreshed;
            }
            Ok(false) => {
                tracing::warn!(event_name = "task.heartbeat.conflict", task_id = %task.id.0, expected_version = expected);
            }
            Err(error) => {
                tracing::warn!(event_name = "task.heartbeat.failed", task_id = %task.id.0, error = %error);
            }
        }
    }

    /// Writes a terminal transition and reports it.
    async fn finish(&self, result: TransitionResult, expected_version: u32) -> Result<bool, ApplicationError> {
        let task_id = result.task.id.clone();
        let state = result.task.state;
        let attempts = result.task.attempt_count;
        let correlation_id = result.task.correlation_id.clone();
        let reason = result.task.last_error.clone();

        let written = self.persist(result, expected_version).await?;
        if written {
            let outcome = if state == TaskState::Completed { AuditOutcome::Success } else { AuditOutcome::Failed };
            let mut event = self
                .audit(&correlation_id)
                .event(format!("task.{}", state.as_str()), AuditCategory::Task, outcome)
                .with_metadata("task_id", task_id.0.clone())
                .with_metadata("attempts", attempts.to_string());
            if let (TaskState::Failed, Some(reason)) = (state, &reason) {
                event = event.with_metadata("failure_reason", reason.clone());
            }
            self.audit_sink.emit(event);
            tracing::info!(
                event_name = "task.finished",
                task_id = %task_id.0,
                state = state.as_str(),
                attempts,
                correlation_id = %correlation_id,
            );
        }
        Ok(written)
    }

    async fn persist(&self, result: TransitionResult, expected_version: u32) -> Result<bool, ApplicationError> {
        let task_id = result.task.id.clone();
        if !self.tasks.update_if_version(result.task, expected_version).await? {
            tracing::warn!(event_name = "task.write.conflict", task_id = %task_id.0, expected_version);
            return Ok(false);
        }
        self.tasks.append_transition(result.transition).await?;
        Ok(true)
    }
}

pub const RESUME_AUDIT_JOB: &str = "resume_audit";

#[derive(Deserialize)]
struct ResumeAuditPayload {
    user_id: String,
    #[serde(default)]
    session_id: Option<String>,
    resume_text: String,
    #[serde(default)]
    job_description: Option<String>,
}

/// Deep resume audit run through the resume capability on its own Context.
/// The result is stored on the task record, so re-running overwrites it.
pub struct ResumeAuditJob {
    orchestrator: Arc<Orchestrator>,
}

impl ResumeAuditJob {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for ResumeAuditJob {
    fn kind(&self) -> &'static str {
        RESUME_AUDIT_JOB
    }

    async fn run(&self, task: &BackgroundTask) -> Result<Value, JobError> {
        let payload: ResumeAuditPayload = serde_json::from_str(&task.payload_json)
            .map_err(|error| JobError::Permanent(format!("invalid resume_audit payload: {error}")))?;

        let mut context = Context::new(TurnInput {
            request_text: "Audit and improve my resume".to_string(),
            user_id: UserId(payload.user_id),
            session_id: SessionId(payload.session_id.unwrap_or_else(|| format!("task-{}", task.id.0))),
            attachments: TurnAttachments {
                resume_text: Some(payload.resume_text),
                job_description: payload.job_description,
                ..TurnAttachments::default()
            },
            correlation_id: task.correlation_id.clone(),
        });

        self.orchestrator.run_detached(CapabilityKind::Resume, &mut context).await?;
        let analysis = context
            .resume_analysis()
            .ok_or_else(|| JobError::Permanent("resume audit produced no analysis".to_string()))?;
        serde_json::to_value(analysis).map_err(|error| JobError::Permanent(error.to_string()))
    }
}
