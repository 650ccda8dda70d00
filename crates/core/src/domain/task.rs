use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskTransitionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the lifecycle; status never moves to a lower rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: TaskId,
    pub kind: String,
    pub payload_json: String,
    pub state: TaskState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub claimed_by: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result_json: Option<String>,
    pub payload_hash: String,
    pub correlation_id: String,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTransitionEvent {
    pub id: TaskTransitionId,
    pub task_id: TaskId,
    pub from_state: Option<TaskState>,
    pub to_state: TaskState,
    pub transition_reason: String,
    pub error_class: Option<String>,
    pub decision_context_json: String,
    pub actor_id: String,
    pub correlation_id: String,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::TaskState;

    #[test]
    fn task_state_round_trips_from_storage_encoding() {
        for state in [TaskState::Queued, TaskState::Running, TaskState::Completed, TaskState::Failed]
        {
            assert_eq!(TaskState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn terminal_states_share_the_highest_rank() {
        assert!(TaskState::Queued.rank() < TaskState::Running.rank());
        assert_eq!(TaskState::Completed.rank(), TaskState::Failed.rank());
        assert!(TaskState::Completed.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }
}
