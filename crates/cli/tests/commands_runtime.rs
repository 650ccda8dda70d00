use std::env;
use std::sync::{Mutex, OnceLock};

use careercoach_cli::commands::{config, doctor, job_status, migrate, start};
use careercoach_core::domain::task::{BackgroundTask, TaskId, TaskState};
use careercoach_db::repositories::SqlTaskRepository;
use careercoach_db::{connect_with_settings, TaskRepository};
use chrono::Utc;
use serde_json::Value;

#[test]
fn start_returns_success_with_valid_env() {
    with_env(&[("CAREERCOACH_DATABASE_URL", "sqlite::memory:")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["llm_provider"], "ollama");
        assert_eq!(payload["details"]["task_workers"], 2);
        assert_eq!(payload["details"]["classifier"], "keyword");
    });
}

#[test]
fn start_returns_config_failure_when_openai_has_no_key() {
    with_env(
        &[("CAREERCOACH_DATABASE_URL", "sqlite::memory:"), ("CAREERCOACH_LLM_PROVIDER", "openai")],
        || {
            let result = start::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "start");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
            assert!(payload["message"].as_str().unwrap_or_default().contains("llm.api_key"));
        },
    );
}

#[test]
fn start_rejects_out_of_range_confidence_threshold() {
    with_env(
        &[
            ("CAREERCOACH_DATABASE_URL", "sqlite::memory:"),
            ("CAREERCOACH_ROUTER_CONFIDENCE_THRESHOLD", "1.5"),
        ],
        || {
            let result = start::run();
            assert_eq!(result.exit_code, 2);
            assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
        },
    );
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("CAREERCOACH_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn config_output_redacts_api_key_and_attributes_env_sources() {
    with_env(
        &[
            ("CAREERCOACH_DATABASE_URL", "sqlite::memory:"),
            ("CAREERCOACH_LLM_PROVIDER", "openai"),
            ("CAREERCOACH_LLM_API_KEY", "sk-live-secret-value"),
            ("CAREERCOACH_TASKS_WORKER_COUNT", "4"),
            ("CAREERCOACH_ROUTER_CLASSIFIER", "llm"),
        ],
        || {
            let output = config::run();

            assert!(output.contains("- llm.api_key = sk-*** (source: env (CAREERCOACH_LLM_API_KEY))"));
            assert!(output.contains("- tasks.worker_count = 4 (source: env (CAREERCOACH_TASKS_WORKER_COUNT))"));
            assert!(output.contains("- router.confidence_threshold = 0.55 (source: default)"));
            assert!(output.contains("- router.classifier = llm (source: env (CAREERCOACH_ROUTER_CLASSIFIER))"));
            assert!(!output.contains("secret-value"));
        },
    );
}

#[test]
fn doctor_reports_pending_migrations_on_a_fresh_database() {
    with_env(&[("CAREERCOACH_DATABASE_URL", "sqlite::memory:")], || {
        let report: Value =
            serde_json::from_str(&doctor::run(true)).expect("doctor emits json");

        assert_eq!(report["overall_status"], "fail");
        let checks = report["checks"].as_array().expect("checks array");
        let status_of = |name: &str| {
            checks.iter().find(|check| check["name"] == name).map(|check| check["status"].clone())
        };
        assert_eq!(status_of("config_validation"), Some(Value::from("pass")));
        assert_eq!(status_of("llm_provider"), Some(Value::from("pass")));
        assert_eq!(status_of("database_connectivity"), Some(Value::from("pass")));
        assert_eq!(status_of("migration_status"), Some(Value::from("fail")));
    });
}

#[test]
fn doctor_passes_after_migrate_on_a_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("doctor.db").display());

    with_env(&[("CAREERCOACH_DATABASE_URL", &url)], || {
        assert_eq!(migrate::run().exit_code, 0);

        let output = doctor::run(false);
        assert!(output.starts_with("doctor: all readiness checks passed"), "{output}");
        assert!(output.contains("- [ok] migration_status"));
    });
}

#[test]
fn job_status_reports_task_details_and_missing_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());

    with_env(&[("CAREERCOACH_DATABASE_URL", &url)], || {
        assert_eq!(migrate::run().exit_code, 0);
        seed_failed_task(&url, "task-cli-1");

        let found = job_status::run("task-cli-1");
        assert_eq!(found.exit_code, 0);
        let payload = parse_payload(&found.output);
        assert_eq!(payload["command"], "job-status");
        assert_eq!(payload["details"]["state"], "failed");
        assert_eq!(payload["details"]["attempt_count"], 3);
        assert_eq!(payload["details"]["failure_reason"], "llm provider unavailable");

        let missing = job_status::run("task-does-not-exist");
        assert_eq!(missing.exit_code, 6);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");
    });
}

#[test]
fn job_status_rejects_blank_task_id() {
    let result = job_status::run("   ");
    assert_eq!(result.exit_code, 64);
    assert_eq!(parse_payload(&result.output)["error_class"], "invalid_argument");
}

fn seed_failed_task(url: &str, id: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build");
    runtime.block_on(async {
        let pool = connect_with_settings(url, 1, 5).await.expect("pool should connect");
        let now = Utc::now();
        let task = BackgroundTask {
            id: TaskId(id.to_string()),
            kind: "resume_audit".to_string(),
            payload_json: "{\"user_id\":\"u-1\"}".to_string(),
            state: TaskState::Failed,
            attempt_count: 3,
            max_attempts: 3,
            claimed_by: None,
            heartbeat_at: None,
            last_error: Some("llm provider unavailable".to_string()),
            result_json: None,
            payload_hash: "hash".to_string(),
            correlation_id: "corr-cli".to_string(),
            state_version: 4,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };
        SqlTaskRepository::new(pool.clone()).insert(task).await.expect("task insert");
        pool.close().await;
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CAREERCOACH_DATABASE_URL",
        "CAREERCOACH_DATABASE_MAX_CONNECTIONS",
        "CAREERCOACH_DATABASE_TIMEOUT_SECS",
        "CAREERCOACH_LLM_PROVIDER",
        "CAREERCOACH_LLM_API_KEY",
        "CAREERCOACH_LLM_BASE_URL",
        "CAREERCOACH_LLM_MODEL",
        "CAREERCOACH_SERVER_BIND_ADDRESS",
        "CAREERCOACH_SERVER_PORT",
        "CAREERCOACH_ROUTER_CONFIDENCE_THRESHOLD",
        "CAREERCOACH_ROUTER_CLASSIFIER",
        "CAREERCOACH_TASKS_WORKER_COUNT",
        "CAREERCOACH_TASKS_MAX_ATTEMPTS",
        "CAREERCOACH_GEO_ENABLED",
        "CAREERCOACH_LOGGING_LEVEL",
        "CAREERCOACH_LOGGING_FORMAT",
        "CAREERCOACH_LOG_LEVEL",
        "CAREERCOACH_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
