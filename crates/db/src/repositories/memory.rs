use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use careercoach_core::domain::application::{ApplicationId, ApplicationStatus, JobApplication};
use careercoach_core::domain::profile::{TurnId, TurnRecord, UserId, UserProfile};
use careercoach_core::domain::session::{InterviewSession, SessionId};
use careercoach_core::domain::task::{BackgroundTask, TaskId, TaskState, TaskTransitionEvent};

use super::{
    ApplicationRepository, InterviewSessionRepository, ProfileRepository, RepositoryError,
    TaskRepository, TurnRepository,
};

#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

#[async_trait::async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn find(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(&id.0).cloned())
    }

    async fn save(&self, profile: UserProfile) -> Result<(), RepositoryError> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.id.0.clone(), profile);
        Ok(())
    }

    async fn ensure_exists(
        &self,
        id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<UserProfile, RepositoryError> {
        let mut profiles = self.profiles.write().await;
        Ok(profiles.entry(id.0.clone()).or_insert_with(|| UserProfile::new(id.clone(), now)).clone())
    }
}

#[derive(Default)]
pub struct InMemoryTurnRepository {
    turns: RwLock<Vec<TurnRecord>>,
}

#[async_trait::async_trait]
impl TurnRepository for InMemoryTurnRepository {
    async fn append(&self, turn: TurnRecord) -> Result<(), RepositoryError> {
        let mut turns = self.turns.write().await;
        if turns.iter().any(|existing| existing.id == turn.id) {
            return Err(RepositoryError::Conflict(format!("turn `{}` already exists", turn.id.0)));
        }
        turns.push(turn);
        Ok(())
    }

    async fn attach_response(
        &self,
        id: &TurnId,
        response: &str,
    ) -> Result<bool, RepositoryError> {
        let mut turns = self.turns.write().await;
        match turns.iter_mut().find(|turn| turn.id == *id) {
            Some(turn) => {
                turn.response = Some(response.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recent_for_session(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, RepositoryError> {
        let turns = self.turns.read().await;
        let matching: Vec<TurnRecord> =
            turns.iter().filter(|turn| turn.session_id == *session_id).cloned().collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, RepositoryError> {
        let turns = self.turns.read().await;
        Ok(turns.iter().rev().filter(|turn| turn.user_id == *user_id).take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryApplicationRepository {
    applications: RwLock<HashMap<String, JobApplication>>,
}

#[async_trait::async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn find(&self, id: &ApplicationId) -> Result<Option<JobApplication>, RepositoryError> {
        let applications = self.applications.read().await;
        Ok(applications.get(&id.0).cloned())
    }

    async fn save(&self, application: JobApplication) -> Result<(), RepositoryError> {
        let mut applications = self.applications.write().await;
        applications.insert(application.id.0.clone(), application);
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<JobApplication>, RepositoryError> {
        let applications = self.applications.read().await;
        let mut listed: Vec<JobApplication> = applications
            .values()
            .filter(|application| application.user_id == *user_id)
            .filter(|application| status.map_or(true, |status| application.status == status))
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            right
                .application_date
                .cmp(&left.application_date)
                .then_with(|| right.created_at.cmp(&left.created_at))
        });
        Ok(listed)
    }

    async fn delete(&self, id: &ApplicationId) -> Result<bool, RepositoryError> {
        let mut applications = self.applications.write().await;
        Ok(applications.remove(&id.0).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryInterviewSessionRepository {
    sessions: RwLock<HashMap<String, InterviewSession>>,
}

#[async_trait::async_trait]
impl InterviewSessionRepository for InMemoryInterviewSessionRepository {
    async fn find(&self, id: &SessionId) -> Result<Option<InterviewSession>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id.0).cloned())
    }

    async fn insert(&self, session: InterviewSession) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "interview session `{}` already exists",
                session.id.0
            )));
        }
        sessions.insert(session.id.0.clone(), session);
        Ok(())
    }

    async fn update_if_version(
        &self,
        session: InterviewSession,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id.0) {
            Some(stored) if stored.state_version == expected_version => {
                *stored = session;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, BackgroundTask>>,
    transitions: RwLock<Vec<TaskTransitionEvent>>,
}

#[async_trait::async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn find(&self, id: &TaskId) -> Result<Option<BackgroundTask>, RepositoryError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id.0).cloned())
    }

    async fn insert(&self, task: BackgroundTask) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id.0) {
            return Err(RepositoryError::Conflict(format!("task `{}` already exists", task.id.0)));
        }
        tasks.insert(task.id.0.clone(), task);
        Ok(())
    }

    async fn update_if_version(
        &self,
        task: BackgroundTask,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id.0) {
            Some(stored)
                if stored.state_version == expected_version && !stored.state.is_terminal() =>
            {
                *stored = task;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<BackgroundTask>, RepositoryError> {
        let tasks = self.tasks.read().await;
        let mut listed: Vec<BackgroundTask> =
            tasks.values().filter(|task| task.state == state).cloned().collect();
        listed.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(listed)
    }

    async fn append_transition(
        &self,
        transition: TaskTransitionEvent,
    ) -> Result<(), RepositoryError> {
        let mut transitions = self.transitions.write().await;
        transitions.push(transition);
        Ok(())
    }

    async fn list_transitions(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<TaskTransitionEvent>, RepositoryError> {
        let transitions = self.transitions.read().await;
        let mut listed: Vec<TaskTransitionEvent> =
            transitions.iter().filter(|event| event.task_id == *task_id).cloned().collect();
        listed.sort_by_key(|event| event.state_version);
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use careercoach_core::domain::profile::UserId;
    use careercoach_core::domain::session::{SessionId, SessionStatus};
    use careercoach_core::session::{fallback_questions, start_session};
    use careercoach_core::task_engine::TaskEngine;

    use crate::repositories::{
        InMemoryInterviewSessionRepository, InMemoryProfileRepository, InMemoryTaskRepository,
        InterviewSessionRepository, ProfileRepository, RepositoryError, TaskRepository,
    };

    #[tokio::test]
    async fn in_memory_profile_ensure_exists_is_idempotent() {
        let repo = InMemoryProfileRepository::default();
        let user = UserId("U-1".to_string());

        let first = repo.ensure_exists(&user, Utc::now()).await.expect("create");
        let second = repo.ensure_exists(&user, Utc::now()).await.expect("ensure");

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn in_memory_session_repo_enforces_version_and_uniqueness() {
        let repo = InMemoryInterviewSessionRepository::default();
        let session = start_session(
            SessionId("S-1".to_string()),
            UserId("U-1".to_string()),
            "Designer",
            "junior",
            fallback_questions("Designer", 1),
            Utc::now(),
        )
        .expect("start");

        repo.insert(session.clone()).await.expect("insert");
        assert!(matches!(repo.insert(session.clone()).await, Err(RepositoryError::Conflict(_))));

        let mut next = session.clone();
        next.status = SessionStatus::Complete;
        next.state_version = 2;
        assert!(repo.update_if_version(next.clone(), 1).await.expect("update"));
        assert!(!repo.update_if_version(next, 1).await.expect("stale update"));
    }

    #[tokio::test]
    async fn in_memory_task_repo_freezes_terminal_tasks() {
        let repo = InMemoryTaskRepository::default();
        let engine = TaskEngine::new();
        let created = engine.create_task("resume_audit", "{}", "corr-1");
        repo.insert(created.task.clone()).await.expect("insert");

        let claimed = engine.claim_task(created.task.clone(), "worker-1", Utc::now()).expect("claim");
        assert!(repo.update_if_version(claimed.task.clone(), 1).await.expect("claim write"));
        let failed = engine
            .fail_task(claimed.task.clone(), "boom", "permanent", Utc::now())
            .expect("fail");
        assert!(repo.update_if_version(failed.task.clone(), 2).await.expect("fail write"));

        let mut resurrect = failed.task.clone();
        resurrect.state_version += 1;
        assert!(!repo.update_if_version(resurrect, 3).await.expect("frozen"));
        assert_eq!(repo.find(&created.task.id).await.expect("find"), Some(failed.task));
    }
}
