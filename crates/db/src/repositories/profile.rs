use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use careercoach_core::domain::profile::{UserId, UserProfile};

use super::{parse_json, parse_timestamp, to_json, ProfileRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProfileRepository {
    pool: DbPool,
}

impl SqlProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProfileRepository for SqlProfileRepository {
    async fn find(&self, id: &UserId) -> Result<Option<UserProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, email, profile_json, preferences_json, created_at, updated_at
             FROM user_profile
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(profile_from_row).transpose()
    }

    async fn save(&self, profile: UserProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_profile (
                id,
                email,
                profile_json,
                preferences_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                profile_json = excluded.profile_json,
                preferences_json = excluded.preferences_json,
                updated_at = excluded.updated_at",
        )
        .bind(&profile.id.0)
        .bind(profile.email.as_deref())
        .bind(to_json("profile_json", &profile.profile_json)?)
        .bind(to_json("preferences_json", &profile.preferences_json)?)
        .bind(profile.created_at.to_rfc3339())
        .bind(profile.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ensure_exists(
        &self,
        id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<UserProfile, RepositoryError> {
        let fresh = UserProfile::new(id.clone(), now);
        sqlx::query(
            "INSERT INTO user_profile (id, email, profile_json, preferences_json, created_at, updated_at)
             VALUES (?, NULL, '{}', '{}', ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&id.0)
        .bind(fresh.created_at.to_rfc3339())
        .bind(fresh.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(self.find(id).await?.unwrap_or(fresh))
    }
}

fn profile_from_row(row: SqliteRow) -> Result<UserProfile, RepositoryError> {
    let profile_json = row.try_get::<String, _>("profile_json")?;
    let preferences_json = row.try_get::<String, _>("preferences_json")?;

    Ok(UserProfile {
        id: UserId(row.try_get("id")?),
        email: row.try_get("email")?,
        profile_json: parse_json("profile_json", &profile_json)?,
        preferences_json: parse_json("preferences_json", &preferences_json)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use careercoach_core::domain::profile::{UserId, UserProfile};

    use super::SqlProfileRepository;
    use crate::migrations;
    use crate::repositories::ProfileRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn ensure_exists_creates_once_and_preserves_saved_fields() {
        let pool = setup_pool().await;
        let repo = SqlProfileRepository::new(pool.clone());
        let user = UserId("U-100".to_string());

        let created = repo.ensure_exists(&user, parse_ts("2026-03-01T09:00:00Z")).await.expect("create");
        assert_eq!(created.profile_json, json!({}));

        let mut updated = created.clone();
        updated.email = Some("ada@example.com".to_string());
        updated.preferences_json = json!({"remote": true});
        updated.updated_at = parse_ts("2026-03-01T10:00:00Z");
        repo.save(updated.clone()).await.expect("save");

        let again = repo.ensure_exists(&user, parse_ts("2026-03-02T09:00:00Z")).await.expect("ensure");
        assert_eq!(again, updated);

        pool.close().await;
    }

    #[tokio::test]
    async fn find_missing_profile_returns_none() {
        let pool = setup_pool().await;
        let repo = SqlProfileRepository::new(pool.clone());

        let found = repo.find(&UserId("U-404".to_string())).await.expect("find");
        assert_eq!(found, None::<UserProfile>);

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
