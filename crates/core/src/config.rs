use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub router: RouterConfig,
    pub orchestration: OrchestrationConfig,
    pub tasks: TaskConfig,
    pub interview: InterviewConfig,
    pub knowledge: KnowledgeConfig,
    pub geo: GeoConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouterConfig {
    pub confidence_threshold: f64,
    pub tie_margin: f64,
    pub history_window: usize,
    pub continuation_confidence: f64,
    pub classifier: ClassifierKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestrationConfig {
    pub traversal_timeout_ms: u64,
    pub memory_timeout_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskConfig {
    pub worker_count: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_backoff_multiplier: u32,
    pub attempt_timeout_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterviewConfig {
    pub default_question_count: usize,
    pub max_question_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnowledgeConfig {
    pub top_k: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeoConfig {
    pub enabled: bool,
    pub nominatim_url: String,
    pub overpass_url: String,
    pub search_radius_m: u32,
    pub user_agent: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

/// Intent classifier behind the Router. `llm` falls back to `keyword` when
/// the model call fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    Keyword,
    Llm,
}

impl ClassifierKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Llm => "llm",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub server_port: Option<u16>,
    pub task_worker_count: Option<usize>,
    pub confidence_threshold: Option<f64>,
    pub classifier: Option<ClassifierKind>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://careercoach.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            router: RouterConfig::default(),
            orchestration: OrchestrationConfig::default(),
            tasks: TaskConfig::default(),
            interview: InterviewConfig::default(),
            knowledge: KnowledgeConfig { top_k: 5 },
            geo: GeoConfig {
                enabled: true,
                nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
                overpass_url: "https://overpass-api.de/api/interpreter".to_string(),
                search_radius_m: 5_000,
                user_agent: "careercoach/0.1".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.55,
            tie_margin: 0.05,
            history_window: 5,
            continuation_confidence: 0.95,
            classifier: ClassifierKind::Keyword,
        }
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self { traversal_timeout_ms: 30_000, memory_timeout_ms: 5_000 }
    }
}

impl OrchestrationConfig {
    pub fn traversal_timeout(&self) -> Duration {
        Duration::from_millis(self.traversal_timeout_ms)
    }

    pub fn memory_timeout(&self) -> Duration {
        Duration::from_millis(self.memory_timeout_ms)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_backoff_multiplier: 2,
            attempt_timeout_secs: 60,
            heartbeat_timeout_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

impl TaskConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Period at which a worker refreshes the heartbeat of its claim.
    pub fn heartbeat_interval(&self) -> Duration {
        (Duration::from_secs(self.heartbeat_timeout_secs) / 4).max(Duration::from_millis(10))
    }

    /// Sleep before the last retry, the longest one a claim can sit through.
    pub fn max_retry_backoff(&self) -> Duration {
        let exponent = self.max_attempts.saturating_sub(2);
        let factor = u64::from(self.retry_backoff_multiplier).saturating_pow(exponent);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self { default_question_count: 5, max_question_count: 10 }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for ClassifierKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "llm" => Ok(Self::Llm),
            other => Err(ConfigError::Validation(format!(
                "unsupported router classifier `{other}` (expected keyword|llm)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("careercoach.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(router) = patch.router {
            if let Some(confidence_threshold) = router.confidence_threshold {
                self.router.confidence_threshold = confidence_threshold;
            }
            if let Some(tie_margin) = router.tie_margin {
                self.router.tie_margin = tie_margin;
            }
            if let Some(classifier) = router.classifier {
                self.router.classifier = classifier;
            }
            if let Some(history_window) = router.history_window {
                self.router.history_window = history_window;
            }
            if let Some(continuation_confidence) = router.continuation_confidence {
                self.router.continuation_confidence = continuation_confidence;
            }
        }

        if let Some(orchestration) = patch.orchestration {
            if let Some(traversal_timeout_ms) = orchestration.traversal_timeout_ms {
                self.orchestration.traversal_timeout_ms = traversal_timeout_ms;
            }
            if let Some(memory_timeout_ms) = orchestration.memory_timeout_ms {
                self.orchestration.memory_timeout_ms = memory_timeout_ms;
            }
        }

        if let Some(tasks) = patch.tasks {
            if let Some(worker_count) = tasks.worker_count {
                self.tasks.worker_count = worker_count;
            }
            if let Some(max_attempts) = tasks.max_attempts {
                self.tasks.max_attempts = max_attempts;
            }
            if let Some(retry_base_delay_ms) = tasks.retry_base_delay_ms {
                self.tasks.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_backoff_multiplier) = tasks.retry_backoff_multiplier {
                self.tasks.retry_backoff_multiplier = retry_backoff_multiplier;
            }
            if let Some(attempt_timeout_secs) = tasks.attempt_timeout_secs {
                self.tasks.attempt_timeout_secs = attempt_timeout_secs;
            }
            if let Some(heartbeat_timeout_secs) = tasks.heartbeat_timeout_secs {
                self.tasks.heartbeat_timeout_secs = heartbeat_timeout_secs;
            }
            if let Some(sweep_interval_secs) = tasks.sweep_interval_secs {
                self.tasks.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(interview) = patch.interview {
            if let Some(default_question_count) = interview.default_question_count {
                self.interview.default_question_count = default_question_count;
            }
            if let Some(max_question_count) = interview.max_question_count {
                self.interview.max_question_count = max_question_count;
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(top_k) = knowledge.top_k {
                self.knowledge.top_k = top_k;
            }
        }

        if let Some(geo) = patch.geo {
            if let Some(enabled) = geo.enabled {
                self.geo.enabled = enabled;
            }
            if let Some(nominatim_url) = geo.nominatim_url {
                self.geo.nominatim_url = nominatim_url;
            }
            if let Some(overpass_url) = geo.overpass_url {
                self.geo.overpass_url = overpass_url;
            }
            if let Some(search_radius_m) = geo.search_radius_m {
                self.geo.search_radius_m = search_radius_m;
            }
            if let Some(user_agent) = geo.user_agent {
                self.geo.user_agent = user_agent;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CAREERCOACH_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CAREERCOACH_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CAREERCOACH_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CAREERCOACH_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CAREERCOACH_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CAREERCOACH_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CAREERCOACH_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CAREERCOACH_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CAREERCOACH_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CAREERCOACH_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CAREERCOACH_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CAREERCOACH_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CAREERCOACH_SERVER_PORT") {
            self.server.port = parse_u16("CAREERCOACH_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CAREERCOACH_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CAREERCOACH_ROUTER_CONFIDENCE_THRESHOLD") {
            self.router.confidence_threshold =
                parse_f64("CAREERCOACH_ROUTER_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_ROUTER_CLASSIFIER") {
            self.router.classifier = value.parse()?;
        }
        if let Some(value) = read_env("CAREERCOACH_ROUTER_TIE_MARGIN") {
            self.router.tie_margin = parse_f64("CAREERCOACH_ROUTER_TIE_MARGIN", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_ROUTER_HISTORY_WINDOW") {
            self.router.history_window =
                parse_usize("CAREERCOACH_ROUTER_HISTORY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_ROUTER_CONTINUATION_CONFIDENCE") {
            self.router.continuation_confidence =
                parse_f64("CAREERCOACH_ROUTER_CONTINUATION_CONFIDENCE", &value)?;
        }

        if let Some(value) = read_env("CAREERCOACH_ORCHESTRATION_TRAVERSAL_TIMEOUT_MS") {
            self.orchestration.traversal_timeout_ms =
                parse_u64("CAREERCOACH_ORCHESTRATION_TRAVERSAL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_ORCHESTRATION_MEMORY_TIMEOUT_MS") {
            self.orchestration.memory_timeout_ms =
                parse_u64("CAREERCOACH_ORCHESTRATION_MEMORY_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("CAREERCOACH_TASKS_WORKER_COUNT") {
            self.tasks.worker_count = parse_usize("CAREERCOACH_TASKS_WORKER_COUNT", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_TASKS_MAX_ATTEMPTS") {
            self.tasks.max_attempts = parse_u32("CAREERCOACH_TASKS_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_TASKS_RETRY_BASE_DELAY_MS") {
            self.tasks.retry_base_delay_ms =
                parse_u64("CAREERCOACH_TASKS_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_TASKS_RETRY_BACKOFF_MULTIPLIER") {
            self.tasks.retry_backoff_multiplier =
                parse_u32("CAREERCOACH_TASKS_RETRY_BACKOFF_MULTIPLIER", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_TASKS_ATTEMPT_TIMEOUT_SECS") {
            self.tasks.attempt_timeout_secs =
                parse_u64("CAREERCOACH_TASKS_ATTEMPT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_TASKS_HEARTBEAT_TIMEOUT_SECS") {
            self.tasks.heartbeat_timeout_secs =
                parse_u64("CAREERCOACH_TASKS_HEARTBEAT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_TASKS_SWEEP_INTERVAL_SECS") {
            self.tasks.sweep_interval_secs =
                parse_u64("CAREERCOACH_TASKS_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("CAREERCOACH_INTERVIEW_DEFAULT_QUESTION_COUNT") {
            self.interview.default_question_count =
                parse_usize("CAREERCOACH_INTERVIEW_DEFAULT_QUESTION_COUNT", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_INTERVIEW_MAX_QUESTION_COUNT") {
            self.interview.max_question_count =
                parse_usize("CAREERCOACH_INTERVIEW_MAX_QUESTION_COUNT", &value)?;
        }

        if let Some(value) = read_env("CAREERCOACH_KNOWLEDGE_TOP_K") {
            self.knowledge.top_k = parse_usize("CAREERCOACH_KNOWLEDGE_TOP_K", &value)?;
        }

        if let Some(value) = read_env("CAREERCOACH_GEO_ENABLED") {
            self.geo.enabled = parse_bool("CAREERCOACH_GEO_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_GEO_NOMINATIM_URL") {
            self.geo.nominatim_url = value;
        }
        if let Some(value) = read_env("CAREERCOACH_GEO_OVERPASS_URL") {
            self.geo.overpass_url = value;
        }
        if let Some(value) = read_env("CAREERCOACH_GEO_SEARCH_RADIUS_M") {
            self.geo.search_radius_m = parse_u32("CAREERCOACH_GEO_SEARCH_RADIUS_M", &value)?;
        }
        if let Some(value) = read_env("CAREERCOACH_GEO_USER_AGENT") {
            self.geo.user_agent = value;
        }

        let log_level = read_env("CAREERCOACH_LOGGING_LEVEL")
            .or_else(|| read_env("CAREERCOACH_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("CAREERCOACH_LOGGING_FORMAT")
            .or_else(|| read_env("CAREERCOACH_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(task_worker_count) = overrides.task_worker_count {
            self.tasks.worker_count = task_worker_count;
        }
        if let Some(confidence_threshold) = overrides.confidence_threshold {
            self.router.confidence_threshold = confidence_threshold;
        }
        if let Some(classifier) = overrides.classifier {
            self.router.classifier = classifier;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_router(&self.router)?;
        validate_orchestration(&self.orchestration)?;
        validate_tasks(&self.tasks)?;
        validate_interview(&self.interview)?;
        validate_knowledge(&self.knowledge)?;
        validate_geo(&self.geo)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("careercoach.toml"), PathBuf::from("config/careercoach.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_router(router: &RouterConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&router.confidence_threshold) {
        return Err(ConfigError::Validation(
            "router.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }
    if !(0.0..=0.5).contains(&router.tie_margin) {
        return Err(ConfigError::Validation(
            "router.tie_margin must be in range 0.0..=0.5".to_string(),
        ));
    }
    if router.history_window == 0 {
        return Err(ConfigError::Validation(
            "router.history_window must be at least 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&router.continuation_confidence) {
        return Err(ConfigError::Validation(
            "router.continuation_confidence must be in range 0.0..=1.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_orchestration(orchestration: &OrchestrationConfig) -> Result<(), ConfigError> {
    if orchestration.traversal_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "orchestration.traversal_timeout_ms must be greater than zero".to_string(),
        ));
    }
    if orchestration.memory_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "orchestration.memory_timeout_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_tasks(tasks: &TaskConfig) -> Result<(), ConfigError> {
    if tasks.worker_count == 0 {
        return Err(ConfigError::Validation(
            "tasks.worker_count must be at least 1".to_string(),
        ));
    }
    if tasks.max_attempts == 0 || tasks.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "tasks.max_attempts must be in range 1..=10".to_string(),
        ));
    }
    if tasks.retry_backoff_multiplier == 0 {
        return Err(ConfigError::Validation(
            "tasks.retry_backoff_multiplier must be at least 1".to_string(),
        ));
    }
    if tasks.attempt_timeout_secs == 0
        || tasks.heartbeat_timeout_secs == 0
        || tasks.sweep_interval_secs == 0
    {
        return Err(ConfigError::Validation(
            "tasks.attempt_timeout_secs, tasks.heartbeat_timeout_secs and tasks.sweep_interval_secs must be greater than zero"
                .to_string(),
        ));
    }
    let busiest = tasks.attempt_timeout() + tasks.max_retry_backoff();
    if Duration::from_secs(tasks.heartbeat_timeout_secs) <= busiest {
        return Err(ConfigError::Validation(format!(
            "tasks.heartbeat_timeout_secs must exceed tasks.attempt_timeout_secs plus the longest retry backoff ({}ms)",
            busiest.as_millis()
        )));
    }
    Ok(())
}

fn validate_interview(interview: &InterviewConfig) -> Result<(), ConfigError> {
    if interview.max_question_count == 0 {
        return Err(ConfigError::Validation(
            "interview.max_question_count must be at least 1".to_string(),
        ));
    }
    if interview.default_question_count == 0
        || interview.default_question_count > interview.max_question_count
    {
        return Err(ConfigError::Validation(format!(
            "interview.default_question_count must be in range 1..={}",
            interview.max_question_count
        )));
    }
    Ok(())
}

fn validate_knowledge(knowledge: &KnowledgeConfig) -> Result<(), ConfigError> {
    if knowledge.top_k == 0 {
        return Err(ConfigError::Validation("knowledge.top_k must be at least 1".to_string()));
    }
    Ok(())
}

fn validate_geo(geo: &GeoConfig) -> Result<(), ConfigError> {
    if !geo.enabled {
        return Ok(());
    }
    for (key, url) in [("geo.nominatim_url", &geo.nominatim_url), ("geo.overpass_url", &geo.overpass_url)]
    {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }
    if geo.search_radius_m == 0 {
        return Err(ConfigError::Validation(
            "geo.search_radius_m must be greater than zero".to_string(),
        ));
    }
    if geo.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "geo.user_agent is required by the OpenStreetMap usage policy".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    router: Option<RouterPatch>,
    orchestration: Option<OrchestrationPatch>,
    tasks: Option<TaskPatch>,
    interview: Option<InterviewPatch>,
    knowledge: Option<KnowledgePatch>,
    geo: Option<GeoPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RouterPatch {
    confidence_threshold: Option<f64>,
    tie_margin: Option<f64>,
    history_window: Option<usize>,
    continuation_confidence: Option<f64>,
    classifier: Option<ClassifierKind>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestrationPatch {
    traversal_timeout_ms: Option<u64>,
    memory_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskPatch {
    worker_count: Option<usize>,
    max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_backoff_multiplier: Option<u32>,
    attempt_timeout_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct InterviewPatch {
    default_question_count: Option<usize>,
    max_question_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    top_k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct GeoPatch {
    enabled: Option<bool>,
    nominatim_url: Option<String>,
    overpass_url: Option<String>,
    search_radius_m: Option<u32>,
    user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ClassifierKind, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_and_expose_design_constants() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| format!("defaults must validate: {err}"))?;

        ensure(config.router.confidence_threshold == 0.55, "threshold default should be 0.55")?;
        ensure(config.tasks.max_attempts == 3, "attempt cap default should be 3")?;
        ensure(config.interview.default_question_count == 5, "default question count is 5")?;
        ensure(config.knowledge.top_k == 5, "knowledge top_k default is 5")?;
        ensure(
            config.orchestration.traversal_timeout().as_millis() == 30_000,
            "traversal deadline default is 30s",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CAREERCOACH_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("careercoach.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "open_ai"
api_key = "${TEST_CAREERCOACH_LLM_KEY}"
base_url = "https://api.openai.com"
model = "gpt-4o-mini"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_CAREERCOACH_LLM_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAREERCOACH_LOG_LEVEL", "warn");
        env::set_var("CAREERCOACH_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CAREERCOACH_LOG_LEVEL", "CAREERCOACH_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAREERCOACH_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("CAREERCOACH_TASKS_MAX_ATTEMPTS", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("careercoach.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[router]
confidence_threshold = 0.6
history_window = 8

[tasks]
max_attempts = 2
worker_count = 3

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    confidence_threshold: Some(0.7),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.router.confidence_threshold == 0.7, "override threshold should win")?;
            ensure(config.router.history_window == 8, "file history window should apply")?;
            ensure(config.tasks.max_attempts == 4, "env attempt cap should win over file")?;
            ensure(config.tasks.worker_count == 3, "file worker count should apply")?;
            Ok(())
        })();

        clear_vars(&["CAREERCOACH_DATABASE_URL", "CAREERCOACH_TASKS_MAX_ATTEMPTS"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAREERCOACH_ROUTER_CONFIDENCE_THRESHOLD", "high");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected invalid override to fail".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "CAREERCOACH_ROUTER_CONFIDENCE_THRESHOLD"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["CAREERCOACH_ROUTER_CONFIDENCE_THRESHOLD"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAREERCOACH_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["CAREERCOACH_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn out_of_range_router_threshold_is_rejected() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.router.confidence_threshold = 1.5;

        let error = match config.validate() {
            Ok(()) => return Err("threshold above 1.0 must be rejected".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("router.confidence_threshold")),
            "validation failure should mention router.confidence_threshold",
        )
    }

    #[test]
    fn heartbeat_timeout_must_outlast_an_attempt_and_its_backoff() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.tasks.attempt_timeout_secs = 60;
        config.tasks.heartbeat_timeout_secs = 60;

        let error = match config.validate() {
            Ok(()) => return Err("heartbeat timeout equal to the attempt timeout must be rejected".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("tasks.heartbeat_timeout_secs")),
            "validation failure should mention tasks.heartbeat_timeout_secs",
        )?;

        config.tasks.retry_base_delay_ms = 30_000;
        config.tasks.heartbeat_timeout_secs = 90;
        ensure(config.tasks.max_retry_backoff().as_secs() == 60, "last retry backoff should be 60s")?;
        ensure(config.validate().is_err(), "60s attempt plus 60s backoff exceeds 90s")?;

        config.tasks.heartbeat_timeout_secs = 121;
        config.validate().map_err(|err| format!("121s heartbeat timeout should validate: {err}"))
    }

    #[test]
    fn router_classifier_is_selected_by_file_env_and_override() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = (|| -> Result<(), String> {
            ensure(
                AppConfig::default().router.classifier == ClassifierKind::Keyword,
                "keyword classifier should be the default",
            )?;

            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("careercoach.toml");
            fs::write(&path, "[router]\nclassifier = \"llm\"\n").map_err(|err| err.to_string())?;
            let from_file = AppConfig::load(LoadOptions { config_path: Some(path.clone()), ..LoadOptions::default() })
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(from_file.router.classifier == ClassifierKind::Llm, "file should select llm")?;

            env::set_var("CAREERCOACH_ROUTER_CLASSIFIER", "keyword");
            let from_env = AppConfig::load(LoadOptions { config_path: Some(path.clone()), ..LoadOptions::default() })
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(from_env.router.classifier == ClassifierKind::Keyword, "env should win over file")?;

            let overridden = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides { classifier: Some(ClassifierKind::Llm), ..ConfigOverrides::default() },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(overridden.router.classifier == ClassifierKind::Llm, "override should win over env")?;

            env::set_var("CAREERCOACH_ROUTER_CLASSIFIER", "oracle");
            ensure(AppConfig::load(LoadOptions::default()).is_err(), "unknown classifier should be rejected")
        })();

        clear_vars(&["CAREERCOACH_ROUTER_CLASSIFIER"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CAREERCOACH_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["CAREERCOACH_LLM_API_KEY"]);
        result
    }
}
