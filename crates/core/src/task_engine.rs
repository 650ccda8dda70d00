//! Deterministic state machine for background task records.
//!
//! Every transition returns the updated record plus an auditable transition
//! event. Status only moves forward: `queued -> running -> completed|failed`.
//! Retries and stale-claim recovery keep the record in `running`.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::domain::task::{BackgroundTask, TaskId, TaskState, TaskTransitionEvent, TaskTransitionId};

#[derive(Clone, Debug)]
pub struct TaskEngineConfig {
    /// How long a running task may go without a heartbeat before it is stale
    pub heartbeat_timeout_seconds: i64,
    /// Attempts allowed per task, including the first
    pub max_attempts: u32,
    /// Backoff multiplier for retries
    pub retry_backoff_multiplier: u32,
    /// Base delay in milliseconds before the first retry
    pub retry_base_delay_ms: u64,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self::from(&TaskConfig::default())
    }
}

impl From<&TaskConfig> for TaskEngineConfig {
    fn from(config: &TaskConfig) -> Self {
        Self {
            heartbeat_timeout_seconds: i64::try_from(config.heartbeat_timeout_secs)
                .unwrap_or(i64::MAX),
            max_attempts: config.max_attempts,
            retry_backoff_multiplier: config.retry_backoff_multiplier,
            retry_base_delay_ms: config.retry_base_delay_ms,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("invalid task transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: TaskState, to: TaskState, reason: String },
    #[error("task not found: {0:?}")]
    TaskNotFound(TaskId),
    #[error("task {0:?} is already claimed by {1}")]
    ClaimConflict(TaskId, String),
    #[error("attempt cap of {max_attempts} reached for task {task_id:?}")]
    AttemptsExhausted { task_id: TaskId, max_attempts: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub task: BackgroundTask,
    pub transition: TaskTransitionEvent,
}

/// A retry scheduled inside the current claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryScheduled {
    pub task: BackgroundTask,
    pub transition: TaskTransitionEvent,
    pub backoff: StdDuration,
}

#[derive(Clone, Debug)]
pub struct TaskEngine {
    config: TaskEngineConfig,
}

impl TaskEngine {
    pub fn new() -> Self {
        Self::with_config(TaskEngineConfig::default())
    }

    pub fn with_config(config: TaskEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TaskEngineConfig {
        &self.config
    }

    /// Creates a `queued` record for a submitted job.
    pub fn create_task(
        &self,
        kind: impl Into<String>,
        payload_json: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> TransitionResult {
        let now = Utc::now();
        let payload_json = payload_json.into();
        let task = BackgroundTask {
            id: TaskId(Uuid::new_v4().to_string()),
            kind: kind.into(),
            payload_hash: Self::hash_payload(&payload_json),
            payload_json,
            state: TaskState::Queued,
            attempt_count: 0,
            max_attempts: self.config.max_attempts,
            claimed_by: None,
            heartbeat_at: None,
            last_error: None,
            result_json: None,
            correlation_id: correlation_id.into(),
            state_version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let transition = Self::transition_event(
            &task,
            None,
            "task_submitted",
            None,
            serde_json::json!({
                "kind": task.kind,
                "payload_hash": task.payload_hash,
                "max_attempts": task.max_attempts,
            }),
            "api",
            now,
        );

        TransitionResult { task, transition }
    }

    /// Claims a task for a worker and starts its first attempt.
    ///
    /// A `running` task whose heartbeat is stale may be re-claimed; it stays
    /// `running` and starts a new attempt.
    pub fn claim_task(
        &self,
        mut task: BackgroundTask,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, TaskError> {
        let worker_id = worker_id.into();

        let reason = match task.state {
            TaskState::Queued => "task_claimed",
            TaskState::Running => {
                if !self.is_stale(&task, now) {
                    return Err(TaskError::ClaimConflict(
                        task.id.clone(),
                        task.claimed_by.clone().unwrap_or_default(),
                    ));
                }
                if task.attempt_count >= task.max_attempts {
                    return Err(TaskError::AttemptsExhausted {
                        task_id: task.id.clone(),
                        max_attempts: task.max_attempts,
                    });
                }
                "task_reclaimed"
            }
            TaskState::Completed | TaskState::Failed => {
                return Err(TaskError::InvalidTransition {
                    from: task.state,
                    to: TaskState::Running,
                    reason: "task already in terminal state".to_string(),
                });
            }
        };

        let from_state = task.state;
        let previous_worker = task.claimed_by.clone();
        task.state = TaskState::Running;
        task.attempt_count += 1;
        task.claimed_by = Some(worker_id.clone());
        task.heartbeat_at = Some(now);
        task.state_version += 1;
        task.updated_at = now;

        let transition = Self::transition_event(
            &task,
            Some(from_state),
            reason,
            None,
            serde_json::json!({
                "worker_id": worker_id,
                "previous_worker": previous_worker,
                "attempt": task.attempt_count,
                "heartbeat_timeout_seconds": self.config.heartbeat_timeout_seconds,
            }),
            &worker_id,
            now,
        );

        Ok(TransitionResult { task, transition })
    }

    /// Records a failed attempt and starts the next one. The task stays
    /// `running`; callers sleep for `backoff` before re-running the job body.
    pub fn retry_task(
        &self,
        mut task: BackgroundTask,
        error: impl Into<String>,
        error_class: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<RetryScheduled, TaskError> {
        Self::require_running(&task)?;
        if task.attempt_count >= task.max_attempts {
            return Err(TaskError::AttemptsExhausted {
                task_id: task.id.clone(),
                max_attempts: task.max_attempts,
            });
        }

        let error = error.into();
        let error_class = error_class.into();
        let backoff = self.backoff_for(task.attempt_count);

        task.attempt_count += 1;
        task.last_error = Some(error.clone());
        task.heartbeat_at = Some(now);
        task.state_version += 1;
        task.updated_at = now;

        let actor = task.claimed_by.clone().unwrap_or_else(|| "system".to_string());
        let transition = Self::transition_event(
            &task,
            Some(TaskState::Running),
            "task_attempt_retry",
            Some(error_class.clone()),
            serde_json::json!({
                "attempt": task.attempt_count,
                "max_attempts": task.max_attempts,
                "backoff_ms": u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                "error": error,
                "error_class": error_class,
            }),
            &actor,
            now,
        );

        Ok(RetryScheduled { task, transition, backoff })
    }

    pub fn heartbeat(
        &self,
        mut task: BackgroundTask,
        now: DateTime<Utc>,
    ) -> Result<BackgroundTask, TaskError> {
        Self::require_running(&task)?;
        task.heartbeat_at = Some(now);
        task.state_version += 1;
        task.updated_at = now;
        Ok(task)
    }

    /// `running -> completed`, storing the job result keyed by task id.
    pub fn complete_task(
        &self,
        mut task: BackgroundTask,
        result_json: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, TaskError> {
        self.validate_transition(&task, TaskState::Completed)?;

        let from_state = task.state;
        let actor = task.claimed_by.clone().unwrap_or_else(|| "system".to_string());
        task.state = TaskState::Completed;
        task.result_json = Some(result_json.into());
        task.claimed_by = None;
        task.completed_at = Some(now);
        task.state_version += 1;
        task.updated_at = now;

        let transition = Self::transition_event(
            &task,
            Some(from_state),
            "task_completed",
            None,
            serde_json::json!({
                "attempts": task.attempt_count,
                "result_hash": task.result_json.as_deref().map(Self::hash_payload),
            }),
            &actor,
            now,
        );

        Ok(TransitionResult { task, transition })
    }

    /// `running -> failed` with the last error recorded.
    pub fn fail_task(
        &self,
        mut task: BackgroundTask,
        error: impl Into<String>,
        error_class: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, TaskError> {
        self.validate_transition(&task, TaskState::Failed)?;

        let error = error.into();
        let error_class = error_class.into();
        let from_state = task.state;
        let actor = task.claimed_by.clone().unwrap_or_else(|| "system".to_string());
        task.state = TaskState::Failed;
        task.last_error = Some(error.clone());
        task.claimed_by = None;
        task.completed_at = Some(now);
        task.state_version += 1;
        task.updated_at = now;

        let transition = Self::transition_event(
            &task,
            Some(from_state),
            "task_failed",
            Some(error_class.clone()),
            serde_json::json!({
                "attempts": task.attempt_count,
                "max_attempts": task.max_attempts,
                "error": error,
                "error_class": error_class,
            }),
            &actor,
            now,
        );

        Ok(TransitionResult { task, transition })
    }

    /// Running tasks whose last heartbeat is older than the timeout.
    pub fn recover_stale_tasks(
        &self,
        tasks: Vec<BackgroundTask>,
        reference_time: DateTime<Utc>,
    ) -> Vec<BackgroundTask> {
        tasks.into_iter().filter(|task| self.is_stale(task, reference_time)).collect()
    }

    pub fn is_stale(&self, task: &BackgroundTask, reference_time: DateTime<Utc>) -> bool {
        let stale_threshold =
            reference_time - Duration::seconds(self.config.heartbeat_timeout_seconds);
        task.state == TaskState::Running
            && task.heartbeat_at.map_or(true, |heartbeat_at| heartbeat_at < stale_threshold)
    }

    /// Delay before attempt `completed_attempts + 1`.
    pub fn backoff_for(&self, completed_attempts: u32) -> StdDuration {
        let exponent = completed_attempts.saturating_sub(1);
        let factor = u64::from(self.config.retry_backoff_multiplier).saturating_pow(exponent);
        StdDuration::from_millis(self.config.retry_base_delay_ms.saturating_mul(factor))
    }

    fn validate_transition(&self, task: &BackgroundTask, to_state: TaskState) -> Result<(), TaskError> {
        let valid = match (task.state, to_state) {
            (TaskState::Queued, TaskState::Running) => true,
            (TaskState::Running, TaskState::Running) => true,
            (TaskState::Running, TaskState::Completed) => true,
            (TaskState::Running, TaskState::Failed) => true,
            _ => false,
        };

        if valid && to_state.rank() >= task.state.rank() {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                from: task.state,
                to: to_state,
                reason: format!("cannot transition from {:?} to {:?}", task.state, to_state),
            })
        }
    }

    fn require_running(task: &BackgroundTask) -> Result<(), TaskError> {
        if task.state == TaskState::Running {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                from: task.state,
                to: TaskState::Running,
                reason: "task is not running".to_string(),
            })
        }
    }

    fn transition_event(
        task: &BackgroundTask,
        from_state: Option<TaskState>,
        reason: &str,
        error_class: Option<String>,
        decision_context: serde_json::Value,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> TaskTransitionEvent {
        TaskTransitionEvent {
            id: TaskTransitionId(Uuid::new_v4().to_string()),
            task_id: task.id.clone(),
            from_state,
            to_state: task.state,
            transition_reason: reason.to_string(),
            error_class,
            decision_context_json: decision_context.to_string(),
            actor_id: actor_id.to_string(),
            correlation_id: task.correlation_id.clone(),
            state_version: task.state_version,
            occurred_at: now,
        }
    }

    pub fn hash_payload(payload: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl Default for TaskEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::{Duration, Utc};

    use super::*;

    fn engine() -> TaskEngine {
        TaskEngine::with_config(TaskEngineConfig {
            heartbeat_timeout_seconds: 60,
            max_attempts: 3,
            retry_backoff_multiplier: 2,
            retry_base_delay_ms: 100,
        })
    }

    fn claimed(engine: &TaskEngine) -> BackgroundTask {
        let created = engine.create_task("resume_audit", "{\"resume_text\":\"x\"}", "corr-001");
        engine.claim_task(created.task, "worker-1", Utc::now()).expect("claim").task
    }

    #[test]
    fn create_task_initializes_queued_state() {
        let created = engine().create_task("resume_audit", "{}", "corr-001");

        assert_eq!(created.task.state, TaskState::Queued);
        assert_eq!(created.task.attempt_count, 0);
        assert_eq!(created.task.max_attempts, 3);
        assert_eq!(created.transition.from_state, None);
        assert_eq!(created.transition.to_state, TaskState::Queued);
        assert_eq!(created.task.payload_hash, TaskEngine::hash_payload("{}"));
    }

    #[test]
    fn claim_starts_first_attempt() {
        let task = claimed(&engine());

        assert_eq!(task.state, TaskState::Running);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.claimed_by.as_deref(), Some("worker-1"));
        assert!(task.heartbeat_at.is_some());
    }

    #[test]
    fn fresh_running_claim_cannot_be_stolen() {
        let engine = engine();
        let task = claimed(&engine);

        let error = engine.claim_task(task, "worker-2", Utc::now()).expect_err("conflict");
        assert!(matches!(error, TaskError::ClaimConflict(_, ref owner) if owner == "worker-1"));
    }

    #[test]
    fn stale_running_claim_is_reclaimed_without_regressing() {
        let engine = engine();
        let task = claimed(&engine);
        let later = Utc::now() + Duration::seconds(120);

        assert_eq!(engine.recover_stale_tasks(vec![task.clone()], later).len(), 1);
        let reclaimed = engine.claim_task(task, "worker-2", later).expect("reclaim");

        assert_eq!(reclaimed.task.state, TaskState::Running);
        assert_eq!(reclaimed.task.attempt_count, 2);
        assert_eq!(reclaimed.transition.from_state, Some(TaskState::Running));
        assert_eq!(reclaimed.transition.transition_reason, "task_reclaimed");
    }

    #[test]
    fn retries_stay_running_and_back_off_exponentially() {
        let engine = engine();
        let task = claimed(&engine);

        let first = engine.retry_task(task, "timeout", "transient", Utc::now()).expect("retry 1");
        assert_eq!(first.task.state, TaskState::Running);
        assert_eq!(first.task.attempt_count, 2);
        assert_eq!(first.backoff, StdDuration::from_millis(100));

        let second =
            engine.retry_task(first.task, "timeout", "transient", Utc::now()).expect("retry 2");
        assert_eq!(second.task.attempt_count, 3);
        assert_eq!(second.backoff, StdDuration::from_millis(200));

        let exhausted = engine
            .retry_task(second.task, "timeout", "transient", Utc::now())
            .expect_err("attempt cap");
        assert!(matches!(exhausted, TaskError::AttemptsExhausted { max_attempts: 3, .. }));
    }

    #[test]
    fn terminal_states_never_regress() {
        let engine = engine();
        let completed = engine
            .complete_task(claimed(&engine), "{\"score\":8}", Utc::now())
            .expect("complete")
            .task;
        assert_eq!(completed.result_json.as_deref(), Some("{\"score\":8}"));
        assert!(completed.completed_at.is_some());

        assert!(engine.claim_task(completed.clone(), "worker-3", Utc::now()).is_err());
        assert!(engine.fail_task(completed.clone(), "late", "permanent", Utc::now()).is_err());
        assert!(engine.complete_task(completed.clone(), "{}", Utc::now()).is_err());
        assert!(engine.heartbeat(completed, Utc::now()).is_err());
    }

    #[test]
    fn failure_records_last_error() {
        let engine = engine();
        let failed = engine
            .fail_task(claimed(&engine), "model unavailable", "transient", Utc::now())
            .expect("fail");

        assert_eq!(failed.task.state, TaskState::Failed);
        assert_eq!(failed.task.last_error.as_deref(), Some("model unavailable"));
        assert_eq!(failed.transition.error_class.as_deref(), Some("transient"));
    }

    #[test]
    fn queued_task_cannot_complete_directly() {
        let engine = engine();
        let created = engine.create_task("resume_audit", "{}", "corr-001");

        let error = engine.complete_task(created.task, "{}", Utc::now()).expect_err("invalid");
        assert!(matches!(
            error,
            TaskError::InvalidTransition { from: TaskState::Queued, to: TaskState::Completed, .. }
        ));
    }
}
