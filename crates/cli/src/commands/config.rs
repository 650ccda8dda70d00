use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use careercoach_core::config::{AppConfig, LlmProvider, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value) in effective_values(&config) {
        let source = field_source(key, &env_key(key), config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {key} = {value} (source: {source})"));
    }
    lines.join("\n")
}

/// Every setting operators usually need to see, secrets redacted.
fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("llm.provider", provider_name(config.llm.provider).to_string()),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("llm.api_key", api_key),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("llm.max_retries", config.llm.max_retries.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("router.confidence_threshold", config.router.confidence_threshold.to_string()),
        ("router.tie_margin", config.router.tie_margin.to_string()),
        ("router.history_window", config.router.history_window.to_string()),
        ("router.continuation_confidence", config.router.continuation_confidence.to_string()),
        ("router.classifier", config.router.classifier.as_str().to_string()),
        ("orchestration.traversal_timeout_ms", config.orchestration.traversal_timeout_ms.to_string()),
        ("orchestration.memory_timeout_ms", config.orchestration.memory_timeout_ms.to_string()),
        ("tasks.worker_count", config.tasks.worker_count.to_string()),
        ("tasks.max_attempts", config.tasks.max_attempts.to_string()),
        ("tasks.retry_base_delay_ms", config.tasks.retry_base_delay_ms.to_string()),
        ("tasks.attempt_timeout_secs", config.tasks.attempt_timeout_secs.to_string()),
        ("tasks.heartbeat_timeout_secs", config.tasks.heartbeat_timeout_secs.to_string()),
        ("interview.default_question_count", config.interview.default_question_count.to_string()),
        ("interview.max_question_count", config.interview.max_question_count.to_string()),
        ("knowledge.top_k", config.knowledge.top_k.to_string()),
        ("geo.enabled", config.geo.enabled.to_string()),
        ("geo.search_radius_m", config.geo.search_radius_m.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_ascii_lowercase()),
    ]
}

pub(crate) fn provider_name(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "openai",
        LlmProvider::Ollama => "ollama",
    }
}

/// `tasks.max_attempts` -> `CAREERCOACH_TASKS_MAX_ATTEMPTS`.
fn env_key(key_path: &str) -> String {
    format!("CAREERCOACH_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("careercoach.toml"), PathBuf::from("config/careercoach.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
