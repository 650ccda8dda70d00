use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use careercoach_core::domain::application::{ApplicationId, ApplicationStatus, JobApplication};
use careercoach_core::domain::profile::{TurnId, TurnRecord, UserId, UserProfile};
use careercoach_core::domain::session::{InterviewSession, SessionId};
use careercoach_core::domain::task::{BackgroundTask, TaskId, TaskState, TaskTransitionEvent};
use careercoach_core::errors::ApplicationError;

pub mod application;
pub mod interview_session;
pub mod memory;
pub mod profile;
pub mod task;
pub mod turn;

pub use application::SqlApplicationRepository;
pub use interview_session::SqlInterviewSessionRepository;
pub use memory::{
    InMemoryApplicationRepository, InMemoryInterviewSessionRepository,
    InMemoryProfileRepository, InMemoryTaskRepository, InMemoryTurnRepository,
};
pub use profile::SqlProfileRepository;
pub use task::SqlTaskRepository;
pub use turn::SqlTurnRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError>;
    async fn save(&self, profile: UserProfile) -> Result<(), RepositoryError>;

    /// Returns the stored profile, creating an empty one first if needed.
    async fn ensure_exists(
        &self,
        id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<UserProfile, RepositoryError>;
}

#[async_trait]
pub trait TurnRepository: Send + Sync {
    async fn append(&self, turn: TurnRecord) -> Result<(), RepositoryError>;

    /// Sets the rendered response on a stored turn. Returns false if the turn
    /// does not exist.
    async fn attach_response(&self, id: &TurnId, response: &str)
        -> Result<bool, RepositoryError>;

    /// Most recent `limit` turns of a session, oldest first.
    async fn recent_for_session(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, RepositoryError>;

    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, RepositoryError>;
}

#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn find(&self, id: &ApplicationId) -> Result<Option<JobApplication>, RepositoryError>;
    async fn save(&self, application: JobApplication) -> Result<(), RepositoryError>;

    async fn list_for_user(
        &self,
        user_id: &UserId,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<JobApplication>, RepositoryError>;

    async fn delete(&self, id: &ApplicationId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait InterviewSessionRepository: Send + Sync {
    async fn find(&self, id: &SessionId) -> Result<Option<InterviewSession>, RepositoryError>;

    /// Stores a new session. Fails with `Conflict` if the id is taken.
    async fn insert(&self, session: InterviewSession) -> Result<(), RepositoryError>;

    /// Replaces the stored record only if its version still equals
    /// `expected_version`. Returns whether the write happened.
    async fn update_if_version(
        &self,
        session: InterviewSession,
        expected_version: u32,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find(&self, id: &TaskId) -> Result<Option<BackgroundTask>, RepositoryError>;

    async fn insert(&self, task: BackgroundTask) -> Result<(), RepositoryError>;

    async fn update_if_version(
        &self,
        task: BackgroundTask,
        expected_version: u32,
    ) -> Result<bool, RepositoryError>;

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<BackgroundTask>, RepositoryError>;

    async fn append_transition(&self, transition: TaskTransitionEvent)
        -> Result<(), RepositoryError>;

    async fn list_transitions(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<TaskTransitionEvent>, RepositoryError>;
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode `{column}`: {error}")))
}

pub(crate) fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
