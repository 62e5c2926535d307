use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub crm: CrmConfig,
    pub channels: ChannelsConfig,
    pub budget: BudgetConfig,
    pub timing: TimingConfig,
    pub knowledge: KnowledgeConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_reask_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub timeout_secs: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelsConfig {
    pub telegram_bot_token: SecretString,
    pub telegram_webhook_secret: SecretString,
    pub whatsapp_api_key: Option<SecretString>,
    pub whatsapp_phone_number_id: Option<String>,
    /// App secret used to verify webhook payload signatures, and the token
    /// echoed back during webhook registration.
    pub whatsapp_webhook_secret: Option<SecretString>,
    /// Chat that receives admin handoffs and operational alerts.
    pub admin_chat_id: String,
}

#[derive(Clone, Debug)]
pub struct BudgetConfig {
    pub max_tokens_per_hour: u64,
    pub max_tokens_per_day: u64,
    pub max_cost_per_day_cents: u64,
    pub max_requests_per_minute: u64,
    pub max_errors_per_hour: u64,
}

#[derive(Clone, Debug)]
pub struct TimingConfig {
    /// Studio-local offset from UTC, in minutes. Vladivostok is +600.
    pub utc_offset_minutes: i32,
    pub session_ttl_hours: u64,
    pub watchdog_interval_secs: u64,
    pub processing_lock_ttl_secs: u64,
    pub dead_letter_alert_depth: u64,
    pub fallback_alert_depth: u64,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Port the channel webhooks listen on. Telegram only delivers to
    /// 443, 80, 88 or 8443.
    pub webhook_port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub crm_base_url: Option<String>,
    pub crm_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_webhook_secret: Option<String>,
    pub admin_chat_id: Option<String>,
    pub knowledge_path: Option<PathBuf>,
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
                url: "sqlite://bookline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            model: ModelConfig {
                api_key: None,
                base_url: None,
                model: "yandexgpt-pro".to_string(),
                timeout_secs: 30,
                max_reask_attempts: 1,
            },
            crm: CrmConfig {
                base_url: String::new(),
                api_key: String::new().into(),
                timeout_secs: 30,
                breaker_failure_threshold: 5,
                breaker_reset_secs: 60,
            },
            channels: ChannelsConfig {
                telegram_bot_token: String::new().into(),
                telegram_webhook_secret: String::new().into(),
                whatsapp_api_key: None,
                whatsapp_phone_number_id: None,
                whatsapp_webhook_secret: None,
                admin_chat_id: String::new(),
            },
            budget: BudgetConfig {
                max_tokens_per_hour: 100_000,
                max_tokens_per_day: 1_000_000,
                max_cost_per_day_cents: 1_000,
                max_requests_per_minute: 30,
                max_errors_per_hour: 50,
            },
            timing: TimingConfig {
                utc_offset_minutes: 600,
                session_ttl_hours: 24,
                watchdog_interval_secs: 30,
                processing_lock_ttl_secs: 30,
                dead_letter_alert_depth: 10,
                fallback_alert_depth: 5,
            },
            knowledge: KnowledgeConfig { path: PathBuf::from("knowledge/studio.toml") },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                webhook_port: 8443,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("bookline.toml"));
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

        if let Some(model) = patch.model {
            if let Some(api_key) = model.api_key {
                self.model.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = model.base_url {
                self.model.base_url = Some(base_url);
            }
            if let Some(name) = model.model {
                self.model.model = name;
            }
            if let Some(timeout_secs) = model.timeout_secs {
                self.model.timeout_secs = timeout_secs;
            }
            if let Some(max_reask_attempts) = model.max_reask_attempts {
                self.model.max_reask_attempts = max_reask_attempts;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = base_url;
            }
            if let Some(api_key) = crm.api_key {
                self.crm.api_key = secret_value(api_key);
            }
            if let Some(timeout_secs) = crm.timeout_secs {
                self.crm.timeout_secs = timeout_secs;
            }
            if let Some(threshold) = crm.breaker_failure_threshold {
                self.crm.breaker_failure_threshold = threshold;
            }
            if let Some(reset) = crm.breaker_reset_secs {
                self.crm.breaker_reset_secs = reset;
            }
        }

        if let Some(channels) = patch.channels {
            if let Some(token) = channels.telegram_bot_token {
                self.channels.telegram_bot_token = secret_value(token);
            }
            if let Some(secret) = channels.telegram_webhook_secret {
                self.channels.telegram_webhook_secret = secret_value(secret);
            }
            if let Some(key) = channels.whatsapp_api_key {
                self.channels.whatsapp_api_key = Some(secret_value(key));
            }
            if let Some(id) = channels.whatsapp_phone_number_id {
                self.channels.whatsapp_phone_number_id = Some(id);
            }
            if let Some(secret) = channels.whatsapp_webhook_secret {
                self.channels.whatsapp_webhook_secret = Some(secret_value(secret));
            }
            if let Some(chat) = channels.admin_chat_id {
                self.channels.admin_chat_id = chat;
            }
        }

        if let Some(budget) = patch.budget {
            if let Some(value) = budget.max_tokens_per_hour {
                self.budget.max_tokens_per_hour = value;
            }
            if let Some(value) = budget.max_tokens_per_day {
                self.budget.max_tokens_per_day = value;
            }
            if let Some(value) = budget.max_cost_per_day_cents {
                self.budget.max_cost_per_day_cents = value;
            }
            if let Some(value) = budget.max_requests_per_minute {
                self.budget.max_requests_per_minute = value;
            }
            if let Some(value) = budget.max_errors_per_hour {
                self.budget.max_errors_per_hour = value;
            }
        }

        if let Some(timing) = patch.timing {
            if let Some(value) = timing.utc_offset_minutes {
                self.timing.utc_offset_minutes = value;
            }
            if let Some(value) = timing.session_ttl_hours {
                self.timing.session_ttl_hours = value;
            }
            if let Some(value) = timing.watchdog_interval_secs {
                self.timing.watchdog_interval_secs = value;
            }
            if let Some(value) = timing.processing_lock_ttl_secs {
                self.timing.processing_lock_ttl_secs = value;
            }
            if let Some(value) = timing.dead_letter_alert_depth {
                self.timing.dead_letter_alert_depth = value;
            }
            if let Some(value) = timing.fallback_alert_depth {
                self.timing.fallback_alert_depth = value;
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(path) = knowledge.path {
                self.knowledge.path = path;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.webhook_port {
                self.server.webhook_port = port;
            }
            if let Some(port) = server.health_check_port {
                self.server.health_check_port = port;
            }
            if let Some(secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = secs;
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
        if let Some(value) = read_env("BOOKLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BOOKLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("BOOKLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BOOKLINE_MODEL_API_KEY") {
            self.model.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("BOOKLINE_MODEL_BASE_URL") {
            self.model.base_url = Some(value);
        }
        if let Some(value) = read_env("BOOKLINE_MODEL_NAME") {
            self.model.model = value;
        }
        if let Some(value) = read_env("BOOKLINE_CRM_BASE_URL") {
            self.crm.base_url = value;
        }
        if let Some(value) = read_env("BOOKLINE_CRM_API_KEY") {
            self.crm.api_key = secret_value(value);
        }
        if let Some(value) = read_env("BOOKLINE_TELEGRAM_BOT_TOKEN") {
            self.channels.telegram_bot_token = secret_value(value);
        }
        if let Some(value) = read_env("BOOKLINE_TELEGRAM_WEBHOOK_SECRET") {
            self.channels.telegram_webhook_secret = secret_value(value);
        }
        if let Some(value) = read_env("BOOKLINE_WHATSAPP_API_KEY") {
            self.channels.whatsapp_api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("BOOKLINE_WHATSAPP_PHONE_NUMBER_ID") {
            self.channels.whatsapp_phone_number_id = Some(value);
        }
        if let Some(value) = read_env("BOOKLINE_WHATSAPP_WEBHOOK_SECRET") {
            self.channels.whatsapp_webhook_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("BOOKLINE_ADMIN_CHAT_ID") {
            self.channels.admin_chat_id = value;
        }
        if let Some(value) = read_env("BOOKLINE_KNOWLEDGE_PATH") {
            self.knowledge.path = PathBuf::from(value);
        }
        if let Some(value) = read_env("BOOKLINE_UTC_OFFSET_MINUTES") {
            self.timing.utc_offset_minutes = parse_i32("BOOKLINE_UTC_OFFSET_MINUTES", &value)?;
        }
        if let Some(value) = read_env("BOOKLINE_SESSION_TTL_HOURS") {
            self.timing.session_ttl_hours = parse_u64("BOOKLINE_SESSION_TTL_HOURS", &value)?;
        }

        let log_level =
            read_env("BOOKLINE_LOGGING_LEVEL").or_else(|| read_env("BOOKLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BOOKLINE_LOGGING_FORMAT").or_else(|| read_env("BOOKLINE_LOG_FORMAT"));
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
        if let Some(base_url) = overrides.crm_base_url {
            self.crm.base_url = base_url;
        }
        if let Some(api_key) = overrides.crm_api_key {
            self.crm.api_key = secret_value(api_key);
        }
        if let Some(token) = overrides.telegram_bot_token {
            self.channels.telegram_bot_token = secret_value(token);
        }
        if let Some(secret) = overrides.telegram_webhook_secret {
            self.channels.telegram_webhook_secret = secret_value(secret);
        }
        if let Some(chat) = overrides.admin_chat_id {
            self.channels.admin_chat_id = chat;
        }
        if let Some(path) = overrides.knowledge_path {
            self.knowledge.path = path;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channels(&self.channels)?;
        validate_budget(&self.budget)?;
        validate_timing(&self.timing)?;
        validate_model(&self.model)?;
        validate_crm(&self.crm)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("bookline.toml"), PathBuf::from("config/bookline.toml")]
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

fn validate_channels(channels: &ChannelsConfig) -> Result<(), ConfigError> {
    if channels.telegram_bot_token.expose_secret().is_empty() {
        return Err(ConfigError::Validation("channels.telegram_bot_token is required".to_string()));
    }
    if channels.telegram_webhook_secret.expose_secret().is_empty() {
        return Err(ConfigError::Validation(
            "channels.telegram_webhook_secret is required".to_string(),
        ));
    }
    if channels.admin_chat_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "channels.admin_chat_id is required for handoff and alerts".to_string(),
        ));
    }
    if channels.whatsapp_api_key.is_some() && channels.whatsapp_phone_number_id.is_none() {
        return Err(ConfigError::Validation(
            "channels.whatsapp_phone_number_id is required when whatsapp_api_key is set"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_budget(budget: &BudgetConfig) -> Result<(), ConfigError> {
    let limits = [
        ("budget.max_tokens_per_hour", budget.max_tokens_per_hour),
        ("budget.max_tokens_per_day", budget.max_tokens_per_day),
        ("budget.max_cost_per_day_cents", budget.max_cost_per_day_cents),
        ("budget.max_requests_per_minute", budget.max_requests_per_minute),
        ("budget.max_errors_per_hour", budget.max_errors_per_hour),
    ];
    for (name, value) in limits {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{name} must be greater than zero")));
        }
    }
    Ok(())
}

fn validate_timing(timing: &TimingConfig) -> Result<(), ConfigError> {
    if timing.utc_offset_minutes.abs() > 14 * 60 {
        return Err(ConfigError::Validation(
            "timing.utc_offset_minutes must be within +/-14 hours".to_string(),
        ));
    }
    if timing.session_ttl_hours == 0 {
        return Err(ConfigError::Validation(
            "timing.session_ttl_hours must be greater than zero".to_string(),
        ));
    }
    if timing.watchdog_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "timing.watchdog_interval_secs must be greater than zero".to_string(),
        ));
    }
    if timing.processing_lock_ttl_secs == 0 || timing.processing_lock_ttl_secs > 120 {
        return Err(ConfigError::Validation(
            "timing.processing_lock_ttl_secs must be in range 1..=120".to_string(),
        ));
    }
    Ok(())
}

fn validate_model(model: &ModelConfig) -> Result<(), ConfigError> {
    if model.timeout_secs == 0 || model.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "model.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.timeout_secs == 0 || crm.timeout_secs > 120 {
        return Err(ConfigError::Validation("crm.timeout_secs must be in range 1..=120".to_string()));
    }
    if crm.breaker_failure_threshold == 0 {
        return Err(ConfigError::Validation(
            "crm.breaker_failure_threshold must be greater than zero".to_string(),
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
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_i32(key: &str, value: &str) -> Result<i32, ConfigError> {
    value
        .parse::<i32>()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    model: Option<ModelPatch>,
    crm: Option<CrmPatch>,
    channels: Option<ChannelsPatch>,
    budget: Option<BudgetPatch>,
    timing: Option<TimingPatch>,
    knowledge: Option<KnowledgePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_reask_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    breaker_failure_threshold: Option<u32>,
    breaker_reset_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelsPatch {
    telegram_bot_token: Option<String>,
    telegram_webhook_secret: Option<String>,
    whatsapp_api_key: Option<String>,
    whatsapp_phone_number_id: Option<String>,
    whatsapp_webhook_secret: Option<String>,
    admin_chat_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BudgetPatch {
    max_tokens_per_hour: Option<u64>,
    max_tokens_per_day: Option<u64>,
    max_cost_per_day_cents: Option<u64>,
    max_requests_per_minute: Option<u64>,
    max_errors_per_hour: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TimingPatch {
    utc_offset_minutes: Option<i32>,
    session_ttl_hours: Option<u64>,
    watchdog_interval_secs: Option<u64>,
    processing_lock_ttl_secs: Option<u64>,
    dead_letter_alert_depth: Option<u64>,
    fallback_alert_depth: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    webhook_port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
