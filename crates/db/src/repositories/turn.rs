use sqlx::{sqlite::SqliteRow, Row};

use careercoach_core::domain::intent::Intent;
use careercoach_core::domain::profile::{TurnId, TurnRecord, UserId};
use careercoach_core::domain::session::SessionId;

use super::{parse_json, parse_timestamp, sql_limit, to_json, RepositoryError, TurnRepository};
use crate::DbPool;

pub struct SqlTurnRepository {
    pool: DbPool,
}

impl SqlTurnRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TurnRepository for SqlTurnRepository {
    async fn append(&self, turn: TurnRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation_turn (
                id,
                user_id,
                session_id,
                message,
                response,
                intent,
                capability,
                metadata_json,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.id.0)
        .bind(&turn.user_id.0)
        .bind(&turn.session_id.0)
        .bind(&turn.message)
        .bind(turn.response.as_deref())
        .bind(turn.intent.as_str())
        .bind(turn.capability.as_deref())
        .bind(to_json("metadata_json", &turn.metadata_json)?)
        .bind(turn.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attach_response(
        &self,
        id: &TurnId,
        response: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE conversation_turn SET response = ? WHERE id = ?")
            .bind(response)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn recent_for_session(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                session_id,
                message,
                response,
                intent,
                capability,
                metadata_json,
                created_at
             FROM conversation_turn
             WHERE session_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&session_id.0)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut turns = rows.into_iter().map(turn_from_row).collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<TurnRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                session_id,
                message,
                response,
                intent,
                capability,
                metadata_json,
                created_at
             FROM conversation_turn
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&user_id.0)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(turn_from_row).collect()
    }
}

fn turn_from_row(row: SqliteRow) -> Result<TurnRecord, RepositoryError> {
    let intent_raw = row.try_get::<String, _>("intent")?;
    let intent = Intent::parse(&intent_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown intent `{intent_raw}`")))?;
    let metadata_json = row.try_get::<String, _>("metadata_json")?;

    Ok(TurnRecord {
        id: TurnId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        session_id: SessionId(row.try_get("session_id")?),
        message: row.try_get("message")?,
        response: row.try_get("response")?,
        intent,
        capability: row.try_get("capability")?,
        metadata_json: parse_json("metadata_json", &metadata_json)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    use careercoach_core::domain::intent::Intent;
    use careercoach_core::domain::profile::{TurnId, TurnRecord, UserId};
    use careercoach_core::domain::session::SessionId;

    use super::SqlTurnRepository;
    use crate::migrations;
    use crate::repositories::{ProfileRepository, SqlProfileRepository, TurnRepository};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn recent_turns_are_windowed_and_oldest_first() {
        let pool = setup_pool().await;
        let user = UserId("U-200".to_string());
        SqlProfileRepository::new(pool.clone())
            .ensure_exists(&user, parse_ts("2026-03-01T09:00:00Z"))
            .await
            .expect("profile");
        let repo = SqlTurnRepository::new(pool.clone());

        for index in 0..4 {
            repo.append(turn(&user, index)).await.expect("append turn");
        }

        let recent = repo
            .recent_for_session(&SessionId("S-200".to_string()), 3)
            .await
            .expect("recent turns");
        let ids: Vec<&str> = recent.iter().map(|turn| turn.id.0.as_str()).collect();
        assert_eq!(ids, vec!["T-1", "T-2", "T-3"]);
        assert_eq!(recent[0].metadata_json, json!({"index": 1}));

        let all = repo.list_for_user(&user, 10).await.expect("list for user");
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id.0, "T-3");

        pool.close().await;
    }

    #[tokio::test]
    async fn attach_response_updates_existing_turn_only() {
        let pool = setup_pool().await;
        let user = UserId("U-201".to_string());
        SqlProfileRepository::new(pool.clone())
            .ensure_exists(&user, parse_ts("2026-03-01T09:00:00Z"))
            .await
            .expect("profile");
        let repo = SqlTurnRepository::new(pool.clone());
        repo.append(turn(&user, 0)).await.expect("append turn");

        assert!(repo.attach_response(&TurnId("T-0".to_string()), "Here you go").await.expect("attach"));
        assert!(!repo.attach_response(&TurnId("T-missing".to_string()), "x").await.expect("attach"));

        let stored = repo
            .recent_for_session(&SessionId("S-200".to_string()), 1)
            .await
            .expect("recent");
        assert_eq!(stored[0].response.as_deref(), Some("Here you go"));

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn turn(user: &UserId, index: i64) -> TurnRecord {
        TurnRecord {
            id: TurnId(format!("T-{index}")),
            user_id: user.clone(),
            session_id: SessionId("S-200".to_string()),
            message: format!("message {index}"),
            response: None,
            intent: Intent::Knowledge,
            capability: Some("knowledge".to_string()),
            metadata_json: json!({"index": index}),
            created_at: parse_ts("2026-03-01T09:00:00Z") + Duration::seconds(index),
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
