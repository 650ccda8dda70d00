use chrono::NaiveDate;
use sqlx::{sqlite::SqliteRow, Row};

use careercoach_core::domain::application::{ApplicationId, ApplicationStatus, JobApplication};
use careercoach_core::domain::profile::UserId;

use super::{parse_timestamp, ApplicationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApplicationRepository {
    pool: DbPool,
}

impl SqlApplicationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApplicationRepository for SqlApplicationRepository {
    async fn find(&self, id: &ApplicationId) -> Result<Option<JobApplication>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                user_id,
                company_name,
                position_title,
                job_url,
                status,
                application_date,
                notes,
                created_at,
                updated_at
             FROM job_application
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(application_from_row).transpose()
    }

    async fn save(&self, application: JobApplication) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO job_application (
                id,
                user_id,
                company_name,
                position_title,
                job_url,
                status,
                application_date,
                notes,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                company_name = excluded.company_name,
                position_title = excluded.position_title,
                job_url = excluded.job_url,
                status = excluded.status,
                application_date = excluded.application_date,
                notes = excluded.notes,
                updated_at = excluded.updated_at",
        )
        .bind(&application.id.0)
        .bind(&application.user_id.0)
        .bind(&application.company_name)
        .bind(&application.position_title)
        .bind(application.job_url.as_deref())
        .bind(application.status.as_str())
        .bind(application.application_date.format("%Y-%m-%d").to_string())
        .bind(application.notes.as_deref())
        .bind(application.created_at.to_rfc3339())
        .bind(application.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<JobApplication>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                company_name,
                position_title,
                job_url,
                status,
                application_date,
                notes,
                created_at,
                updated_at
             FROM job_application
             WHERE user_id = ? AND (? IS NULL OR status = ?)
             ORDER BY application_date DESC, created_at DESC",
        )
        .bind(&user_id.0)
        .bind(status.as_ref().map(ApplicationStatus::as_str))
        .bind(status.as_ref().map(ApplicationStatus::as_str))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(application_from_row).collect()
    }

    async fn delete(&self, id: &ApplicationId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM job_application WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn application_from_row(row: SqliteRow) -> Result<JobApplication, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ApplicationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown application status `{status_raw}`"))
    })?;
    let date_raw = row.try_get::<String, _>("application_date")?;
    let application_date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d").map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `application_date`: `{date_raw}` ({error})"))
    })?;

    Ok(JobApplication {
        id: ApplicationId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        company_name: row.try_get("company_name")?,
        position_title: row.try_get("position_title")?,
        job_url: row.try_get("job_url")?,
        status,
        application_date,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
