use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use careercoach_agent::CoachRuntime;
use careercoach_db::DbPool;
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    runtime: Arc<CoachRuntime>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub tasks: HealthCheck,
    pub checked_at: String,
}

/// `GET /health`: 200 when the database answers, 503 otherwise.
pub fn router(db_pool: DbPool, runtime: Arc<CoachRuntime>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, runtime })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match careercoach_db::ping(&state.db_pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => HealthCheck { status: "degraded", detail: format!("database query failed: {error}") },
    };
    let tasks = HealthCheck {
        status: "ready",
        detail: format!(
            "{} worker(s); job kinds: {}",
            state.runtime.config().tasks.worker_count,
            state.runtime.tasks().job_kinds().join(", ")
        ),
    };
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        tasks,
        checked_at: Utc::now().to_rfc3339(),
    };
    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use careercoach_agent::geo::StaticGeoLocator;
    use careercoach_agent::{CoachRuntime, CoachStores};
    use careercoach_core::config::AppConfig;
    use careercoach_db::{connect_with_settings, DbPool};

    use crate::health::{health, HealthState};

    async fn state(pool: DbPool) -> HealthState {
        let runtime = CoachRuntime::builder(AppConfig::default(), CoachStores::sqlite(pool.clone()))
            .geo(Arc::new(StaticGeoLocator::disabled()))
            .build()
            .expect("runtime");
        HealthState { db_pool: pool, runtime: Arc::new(runtime) }
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = health(State(state(pool.clone()).await)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert!(payload.tasks.detail.contains("resume_audit"));

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5).await.expect("pool should connect");
        let state = state(pool.clone()).await;
        pool.close().await;

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
    }
}
