use std::sync::Arc;

use careercoach_agent::{CoachRuntime, CoachStores};
use careercoach_core::config::{AppConfig, ConfigError, LoadOptions};
use careercoach_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<CoachRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("runtime wiring failed: {0}")]
    Runtime(#[source] anyhow::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects, migrates and wires the runtime. Task workers start here, so
/// this must run inside the tokio runtime that will serve requests.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let runtime = CoachRuntime::builder(config.clone(), CoachStores::sqlite(db_pool.clone()))
        .audit_sink(Arc::new(TracingAuditSink))
        .build()
        .map_err(BootstrapError::Runtime)?;
    let runtime = Arc::new(runtime);

    match runtime.tasks().recover().await {
        Ok(requeued) => info!(
            event_name = "system.bootstrap.tasks_recovered",
            correlation_id = "bootstrap",
            requeued,
            "unfinished background tasks re-enqueued"
        ),
        Err(error) => tracing::warn!(
            event_name = "system.bootstrap.task_recovery_failed",
            correlation_id = "bootstrap",
            error = %error,
            "could not scan for unfinished background tasks"
        ),
    }
    runtime.tasks().spawn_recovery_sweep();

    Ok(Application { config, db_pool, runtime })
}

#[cfg(test)]
mod tests {
    use careercoach_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_llm_settings() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_runtime() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('user_profile', 'conversation_turn', 'job_application', 'interview_session', 'background_task')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 5);
        assert_eq!(app.runtime.tasks().job_kinds(), vec!["resume_audit"]);

        app.runtime.shutdown();
        app.db_pool.close().await;
    }
}
