use sqlx::{sqlite::SqliteRow, Row};

use careercoach_core::domain::profile::UserId;
use careercoach_core::domain::session::{InterviewSession, SessionId, SessionStatus};

use super::{
    parse_json, parse_optional_timestamp, parse_timestamp, parse_u32, to_json,
    InterviewSessionRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlInterviewSessionRepository {
    pool: DbPool,
}

impl SqlInterviewSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InterviewSessionRepository for SqlInterviewSessionRepository {
    async fn find(&self, id: &SessionId) -> Result<Option<InterviewSession>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                user_id,
                role,
                level,
                questions_json,
                answers_json,
                question_cursor,
                status,
                summary_json,
                score,
                state_version,
                created_at,
                updated_at,
                completed_at
             FROM interview_session
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn insert(&self, session: InterviewSession) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO interview_session (
                id,
                user_id,
                role,
                level,
                questions_json,
                answers_json,
                question_cursor,
                status,
                summary_json,
                score,
                state_version,
                created_at,
                updated_at,
                completed_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&session.id.0)
        .bind(&session.user_id.0)
        .bind(&session.role)
        .bind(&session.level)
        .bind(to_json("questions_json", &session.questions)?)
        .bind(to_json("answers_json", &session.answers)?)
        .bind(cursor_value(session.cursor)?)
        .bind(session.status.as_str())
        .bind(session.summary.as_ref().map(|summary| to_json("summary_json", summary)).transpose()?)
        .bind(session.score)
        .bind(i64::from(session.state_version))
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.completed_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "interview session `{}` already exists",
                session.id.0
            )));
        }
        Ok(())
    }

    async fn update_if_version(
        &self,
        session: InterviewSession,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE interview_session SET
                answers_json = ?,
                question_cursor = ?,
                status = ?,
                summary_json = ?,
                score = ?,
                state_version = ?,
                updated_at = ?,
                completed_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(to_json("answers_json", &session.answers)?)
        .bind(cursor_value(session.cursor)?)
        .bind(session.status.as_str())
        .bind(session.summary.as_ref().map(|summary| to_json("summary_json", summary)).transpose()?)
        .bind(session.score)
        .bind(i64::from(session.state_version))
        .bind(session.updated_at.to_rfc3339())
        .bind(session.completed_at.map(|value| value.to_rfc3339()))
        .bind(&session.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn cursor_value(cursor: usize) -> Result<i64, RepositoryError> {
    i64::try_from(cursor)
        .map_err(|_| RepositoryError::Decode(format!("question cursor {cursor} out of range")))
}

fn session_from_row(row: SqliteRow) -> Result<InterviewSession, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = SessionStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session status `{status_raw}`")))?;
    let cursor_raw = row.try_get::<i64, _>("question_cursor")?;
    let cursor = usize::try_from(cursor_raw).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `question_cursor`: {cursor_raw}"))
    })?;
    let questions_json = row.try_get::<String, _>("questions_json")?;
    let answers_json = row.try_get::<String, _>("answers_json")?;
    let summary = row
        .try_get::<Option<String>, _>("summary_json")?
        .map(|raw| parse_json("summary_json", &raw))
        .transpose()?;

    Ok(InterviewSession {
        id: SessionId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        role: row.try_get("role")?,
        level: row.try_get("level")?,
        questions: parse_json("questions_json", &questions_json)?,
        answers: parse_json("answers_json", &answers_json)?,
        cursor,
        status,
        summary,
        score: row.try_get("score")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}
