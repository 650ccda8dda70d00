use careercoach_core::config::{AppConfig, LoadOptions};
use careercoach_db::{connect_with_settings, ping};
use serde_json::json;

use crate::commands::config::provider_name;
use crate::commands::{block_on_runtime, CommandResult};

/// Preflight for `careercoach-server`: config must validate and the
/// database must answer before the server is worth launching.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "start",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match block_on_runtime() {
        Ok(runtime) => runtime,
        Err(message) => return CommandResult::failure("start", "runtime_init", message, 3),
    };

    let reachable = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await?;
        let outcome = ping(&pool).await;
        pool.close().await;
        outcome
    });
    if let Err(error) = reachable {
        return CommandResult::failure(
            "start",
            "db_connectivity",
            format!("database `{}` is unreachable: {error}", config.database.url),
            4,
        );
    }

    CommandResult::success_with_details(
        "start",
        format!(
            "preflight passed; run careercoach-server to listen on {}:{}",
            config.server.bind_address, config.server.port
        ),
        Some(json!({
            "llm_provider": provider_name(config.llm.provider),
            "llm_model": config.llm.model,
            "task_workers": config.tasks.worker_count,
            "confidence_threshold": config.router.confidence_threshold,
            "classifier": config.router.classifier.as_str(),
        })),
    )
}
