use careercoach_core::config::{AppConfig, LlmProvider, LoadOptions};
use careercoach_db::{connect_with_settings, migrations::MIGRATOR, DbPool};
use serde::Serialize;

use crate::commands::block_on_runtime;
use crate::commands::config::provider_name;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_llm_provider(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["llm_provider", "database_connectivity", "migration_status"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_provider(config: &AppConfig) -> DoctorCheck {
    let provider = provider_name(config.llm.provider);
    match config.llm.provider {
        LlmProvider::OpenAi => DoctorCheck::pass(
            "llm_provider",
            format!("{provider} model `{}` with api key configured", config.llm.model),
        ),
        LlmProvider::Ollama => {
            let endpoint = config.llm.base_url.as_deref().unwrap_or("http://localhost:11434");
            DoctorCheck::pass(
                "llm_provider",
                format!("{provider} model `{}` at {endpoint} (reachability not checked)", config.llm.model),
            )
        }
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match block_on_runtime() {
        Ok(runtime) => runtime,
        Err(message) => {
            return vec![
                DoctorCheck::fail("database_connectivity", message),
                DoctorCheck::skipped("migration_status", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("migration_status", "the database is unreachable"),
                ];
            }
        };

        let checks = vec![
            DoctorCheck::pass("database_connectivity", format!("connected using `{}`", config.database.url)),
            check_migrations(&pool).await,
        ];
        pool.close().await;
        checks
    })
}

async fn check_migrations(pool: &DbPool) -> DoctorCheck {
    let applied: Vec<(i64,)> =
        match sqlx::query_as("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await
        {
            Ok(rows) => rows,
            Err(_) => {
                return DoctorCheck::fail(
                    "migration_status",
                    "no migrations applied; run `careercoach migrate`",
                );
            }
        };

    let pending: Vec<i64> = MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .map(|migration| migration.version)
        .filter(|version| !applied.iter().any(|(applied,)| applied == version))
        .collect();

    if pending.is_empty() {
        DoctorCheck::pass("migration_status", format!("{} migration(s) applied", applied.len()))
    } else {
        DoctorCheck::fail(
            "migration_status",
            format!("pending migration version(s) {pending:?}; run `careercoach migrate`"),
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
