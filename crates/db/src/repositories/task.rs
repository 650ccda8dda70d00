use sqlx::{sqlite::SqliteRow, Row};

use careercoach_core::domain::task::{
    BackgroundTask, TaskId, TaskState, TaskTransitionEvent, TaskTransitionId,
};

use super::{
    parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError, TaskRepository,
};
use crate::DbPool;

pub struct SqlTaskRepository {
    pool: DbPool,
}

impl SqlTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqlTaskRepository {
    async fn find(&self, id: &TaskId) -> Result<Option<BackgroundTask>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                kind,
                payload_json,
                state,
                attempt_count,
                max_attempts,
                claimed_by,
                heartbeat_at,
                last_error,
                result_json,
                payload_hash,
                correlation_id,
                state_version,
                created_at,
                updated_at,
                completed_at
             FROM background_task
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(task_from_row).transpose()
    }

    async fn insert(&self, task: BackgroundTask) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO background_task (
                id,
                kind,
                payload_json,
                state,
                attempt_count,
                max_attempts,
                claimed_by,
                heartbeat_at,
                last_error,
                result_json,
                payload_hash,
                correlation_id,
                state_version,
                created_at,
                updated_at,
                completed_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&task.id.0)
        .bind(&task.kind)
        .bind(&task.payload_json)
        .bind(task.state.as_str())
        .bind(i64::from(task.attempt_count))
        .bind(i64::from(task.max_attempts))
        .bind(task.claimed_by.as_deref())
        .bind(task.heartbeat_at.map(|value| value.to_rfc3339()))
        .bind(task.last_error.as_deref())
        .bind(task.result_json.as_deref())
        .bind(&task.payload_hash)
        .bind(&task.correlation_id)
        .bind(i64::from(task.state_version))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!("task `{}` already exists", task.id.0)));
        }
        Ok(())
    }

    async fn update_if_version(
        &self,
        task: BackgroundTask,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        // Terminal rows are never rewritten, which keeps the stored result
        // stable once a task completed or failed.
        let result = sqlx::query(
            "UPDATE background_task SET
                state = ?,
                attempt_count = ?,
                claimed_by = ?,
                heartbeat_at = ?,
                last_error = ?,
                result_json = ?,
                state_version = ?,
                updated_at = ?,
                completed_at = ?
             WHERE id = ?
               AND state_version = ?
               AND state NOT IN ('completed', 'failed')",
        )
        .bind(task.state.as_str())
        .bind(i64::from(task.attempt_count))
        .bind(task.claimed_by.as_deref())
        .bind(task.heartbeat_at.map(|value| value.to_rfc3339()))
        .bind(task.last_error.as_deref())
        .bind(task.result_json.as_deref())
        .bind(i64::from(task.state_version))
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|value| value.to_rfc3339()))
        .bind(&task.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<BackgroundTask>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                kind,
                payload_json,
                state,
                attempt_count,
                max_attempts,
                claimed_by,
                heartbeat_at,
                last_error,
                result_json,
                payload_hash,
                correlation_id,
                state_version,
                created_at,
                updated_at,
                completed_at
             FROM background_task
             WHERE state = ?
             ORDER BY created_at ASC",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn append_transition(
        &self,
        transition: TaskTransitionEvent,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO background_task_transition (
                id,
                task_id,
                from_state,
                to_state,
                transition_reason,
                error_class,
                decision_context_json,
                actor_id,
                correlation_id,
                state_version,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transition.id.0)
        .bind(&transition.task_id.0)
        .bind(transition.from_state.as_ref().map(TaskState::as_str))
        .bind(transition.to_state.as_str())
        .bind(&transition.transition_reason)
        .bind(transition.error_class.as_deref())
        .bind(&transition.decision_context_json)
        .bind(&transition.actor_id)
        .bind(&transition.correlation_id)
        .bind(i64::from(transition.state_version))
        .bind(transition.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_transitions(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<TaskTransitionEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                task_id,
                from_state,
                to_state,
                transition_reason,
                error_class,
                decision_context_json,
                actor_id,
                correlation_id,
                state_version,
                occurred_at
             FROM background_task_transition
             WHERE task_id = ?
             ORDER BY state_version ASC, occurred_at ASC",
        )
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }
}

fn parse_state(column: &str, raw: &str) -> Result<TaskState, RepositoryError> {
    TaskState::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task state in `{column}`: `{raw}`")))
}

fn task_from_row(row: SqliteRow) -> Result<BackgroundTask, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;

    Ok(BackgroundTask {
        id: TaskId(row.try_get("id")?),
        kind: row.try_get("kind")?,
        payload_json: row.try_get("payload_json")?,
        state: parse_state("state", &state_raw)?,
        attempt_count: parse_u32("attempt_count", row.try_get("attempt_count")?)?,
        max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
        claimed_by: row.try_get("claimed_by")?,
        heartbeat_at: parse_optional_timestamp("heartbeat_at", row.try_get("heartbeat_at")?)?,
        last_error: row.try_get("last_error")?,
        result_json: row.try_get("result_json")?,
        payload_hash: row.try_get("payload_hash")?,
        correlation_id: row.try_get("correlation_id")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<TaskTransitionEvent, RepositoryError> {
    let from_state = row
        .try_get::<Option<String>, _>("from_state")?
        .map(|value| parse_state("from_state", &value))
        .transpose()?;
    let to_state_raw = row.try_get::<String, _>("to_state")?;

    Ok(TaskTransitionEvent {
        id: TaskTransitionId(row.try_get("id")?),
        task_id: TaskId(row.try_get("task_id")?),
        from_state,
        to_state: parse_state("to_state", &to_state_raw)?,
        transition_reason: row.try_get("transition_reason")?,
        error_class: row.try_get("error_class")?,
        decision_context_json: row.try_get("decision_context_json")?,
        actor_id: row.try_get("actor_id")?,
        correlation_id: row.try_get("correlation_id")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
