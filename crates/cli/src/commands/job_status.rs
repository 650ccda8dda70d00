use careercoach_core::config::{AppConfig, LoadOptions};
use careercoach_core::domain::task::{BackgroundTask, TaskId, TaskState};
use careercoach_db::repositories::SqlTaskRepository;
use careercoach_db::{connect_with_settings, TaskRepository};
use serde_json::{json, Value};

use crate::commands::{block_on_runtime, CommandResult};

pub fn run(task_id: &str) -> CommandResult {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return CommandResult::failure("job-status", "invalid_argument", "task id must not be empty", 64);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "job-status",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match block_on_runtime() {
        Ok(runtime) => runtime,
        Err(message) => return CommandResult::failure("job-status", "runtime_init", message, 3),
    };

    let lookup = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let found = SqlTaskRepository::new(pool.clone())
            .find(&TaskId(task_id.to_string()))
            .await
            .map_err(|error| ("db_query", error.to_string(), 4u8));
        pool.close().await;
        found
    });

    match lookup {
        Ok(Some(task)) => CommandResult::success_with_details(
            "job-status",
            format!("task {} is {}", task.id.0, task.state.as_str()),
            Some(task_details(&task)),
        ),
        Ok(None) => CommandResult::failure(
            "job-status",
            "not_found",
            format!("no background task with id `{task_id}`"),
            6,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("job-status", error_class, message, exit_code)
        }
    }
}

fn task_details(task: &BackgroundTask) -> Value {
    let result = task
        .result_json
        .as_deref()
        .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())));
    let failure_reason =
        if task.state == TaskState::Failed { task.last_error.clone() } else { None };

    json!({
        "task_id": task.id.0,
        "kind": task.kind,
        "state": task.state.as_str(),
        "attempt_count": task.attempt_count,
        "max_attempts": task.max_attempts,
        "result": result,
        "failure_reason": failure_reason,
        "created_at": task.created_at.to_rfc3339(),
        "updated_at": task.updated_at.to_rfc3339(),
        "completed_at": task.completed_at.map(|at| at.to_rfc3339()),
    })
}
