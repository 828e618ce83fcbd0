use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub dialogue: DialogueConfig,
    pub risk: RiskConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// Empty base URL selects the built-in scripted backend instead of HTTP.
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    /// Classifications below this confidence are treated as unrecognized.
    pub confidence_threshold: f64,
    /// How many recent user/assistant exchanges prompts may see.
    pub history_window: usize,
    /// Consecutive unrecognized turns before escalating to a human.
    pub max_unknown_intent_retries: u32,
    pub session_timeout_minutes: i64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RiskConfig {
    pub max_requests_per_minute: u32,
    pub max_message_chars: usize,
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
    pub log_level: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub confidence_threshold: Option<f64>,
    pub max_unknown_intent_retries: Option<u32>,
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
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            llm: LlmConfig {
                base_url: None,
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 8,
                max_retries: 2,
            },
            dialogue: DialogueConfig {
                confidence_threshold: 0.7,
                history_window: 3,
                max_unknown_intent_retries: 3,
                session_timeout_minutes: 30,
                sweep_interval_secs: 300,
            },
            risk: RiskConfig { max_requests_per_minute: 60, max_message_chars: 2000 },
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
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

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
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

        if let Some(dialogue) = patch.dialogue {
            if let Some(confidence_threshold) = dialogue.confidence_threshold {
                self.dialogue.confidence_threshold = confidence_threshold;
            }
            if let Some(history_window) = dialogue.history_window {
                self.dialogue.history_window = history_window;
            }
            if let Some(max_unknown_intent_retries) = dialogue.max_unknown_intent_retries {
                self.dialogue.max_unknown_intent_retries = max_unknown_intent_retries;
            }
            if let Some(session_timeout_minutes) = dialogue.session_timeout_minutes {
                self.dialogue.session_timeout_minutes = session_timeout_minutes;
            }
            if let Some(sweep_interval_secs) = dialogue.sweep_interval_secs {
                self.dialogue.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(risk) = patch.risk {
            if let Some(max_requests_per_minute) = risk.max_requests_per_minute {
                self.risk.max_requests_per_minute = max_requests_per_minute;
            }
            if let Some(max_message_chars) = risk.max_message_chars {
                self.risk.max_message_chars = max_message_chars;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCIERGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_PORT") {
            self.server.port = parse_u16("CONCIERGE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CONCIERGE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONCIERGE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CONCIERGE_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_DIALOGUE_CONFIDENCE_THRESHOLD") {
            self.dialogue.confidence_threshold =
                parse_f64("CONCIERGE_DIALOGUE_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DIALOGUE_HISTORY_WINDOW") {
            self.dialogue.history_window =
                parse_u32("CONCIERGE_DIALOGUE_HISTORY_WINDOW", &value)? as usize;
        }
        if let Some(value) = read_env("CONCIERGE_DIALOGUE_MAX_UNKNOWN_INTENT_RETRIES") {
            self.dialogue.max_unknown_intent_retries =
                parse_u32("CONCIERGE_DIALOGUE_MAX_UNKNOWN_INTENT_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DIALOGUE_SESSION_TIMEOUT_MINUTES") {
            self.dialogue.session_timeout_minutes =
                parse_i64("CONCIERGE_DIALOGUE_SESSION_TIMEOUT_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DIALOGUE_SWEEP_INTERVAL_SECS") {
            self.dialogue.sweep_interval_secs =
                parse_u64("CONCIERGE_DIALOGUE_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_RISK_MAX_REQUESTS_PER_MINUTE") {
            self.risk.max_requests_per_minute =
                parse_u32("CONCIERGE_RISK_MAX_REQUESTS_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_RISK_MAX_MESSAGE_CHARS") {
            self.risk.max_message_chars =
                parse_u32("CONCIERGE_RISK_MAX_MESSAGE_CHARS", &value)? as usize;
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(confidence_threshold) = overrides.confidence_threshold {
            self.dialogue.confidence_threshold = confidence_threshold;
        }
        if let Some(max_unknown_intent_retries) = overrides.max_unknown_intent_retries {
            self.dialogue.max_unknown_intent_retries = max_unknown_intent_retries;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_llm(&self.llm)?;
        validate_dialogue(&self.dialogue)?;
        validate_risk(&self.risk)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required when llm.base_url is set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_dialogue(dialogue: &DialogueConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&dialogue.confidence_threshold) {
        return Err(ConfigError::Validation(
            "dialogue.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    if dialogue.max_unknown_intent_retries == 0 {
        return Err(ConfigError::Validation(
            "dialogue.max_unknown_intent_retries must be greater than zero".to_string(),
        ));
    }

    if dialogue.session_timeout_minutes <= 0 {
        return Err(ConfigError::Validation(
            "dialogue.session_timeout_minutes must be greater than zero".to_string(),
        ));
    }

    if dialogue.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "dialogue.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_risk(risk: &RiskConfig) -> Result<(), ConfigError> {
    if risk.max_requests_per_minute == 0 {
        return Err(ConfigError::Validation(
            "risk.max_requests_per_minute must be greater than zero".to_string(),
        ));
    }

    if risk.max_message_chars == 0 {
        return Err(ConfigError::Validation(
            "risk.max_message_chars must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    llm: Option<LlmPatch>,
    dialogue: Option<DialoguePatch>,
    risk: Option<RiskPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DialoguePatch {
    confidence_threshold: Option<f64>,
    history_window: Option<usize>,
    max_unknown_intent_retries: Option<u32>,
    session_timeout_minutes: Option<i64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RiskPatch {
    max_requests_per_minute: Option<u32>,
    max_message_chars: Option<usize>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

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
    fn defaults_are_valid_without_any_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.dialogue.confidence_threshold == 0.7, "threshold default should be 0.7")?;
        ensure(
            config.dialogue.max_unknown_intent_retries == 3,
            "unknown-intent retries should default to 3",
        )?;
        ensure(config.risk.max_requests_per_minute == 60, "rate limit should default to 60")?;
        ensure(config.risk.max_message_chars == 2000, "length ceiling should default to 2000")?;
        ensure(config.llm.timeout_secs == 8, "llm timeout should default to 8s")?;
        ensure(config.llm.base_url.is_none(), "no backend url should be configured by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CONCIERGE_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[llm]
base_url = "https://llm.internal"
api_key = "${TEST_CONCIERGE_API_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let api_key = config
                .llm
                .api_key
                .as_ref()
                .map(|key| key.expose_secret().to_string())
                .unwrap_or_default();
            ensure(api_key == "sk-from-env", "api key should be loaded from environment")
        })();

        clear_vars(&["TEST_CONCIERGE_API_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_LLM_MODEL", "model-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[llm]
model = "model-from-file"

[logging]
level = "warn"

[dialogue]
confidence_threshold = 0.5
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    confidence_threshold: Some(0.9),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.model == "model-from-env", "env model should win over file")?;
            ensure(config.logging.level == "debug", "override log level should win")?;
            ensure(
                config.dialogue.confidence_threshold == 0.9,
                "override threshold should win over file",
            )
        })();

        clear_vars(&["CONCIERGE_LLM_MODEL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_DIALOGUE_CONFIDENCE_THRESHOLD", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("dialogue.confidence_threshold")
            );
            ensure(has_message, "validation failure should mention the offending key")
        })();

        clear_vars(&["CONCIERGE_DIALOGUE_CONFIDENCE_THRESHOLD"]);
        result
    }

    #[test]
    fn backend_url_requires_an_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_LLM_BASE_URL", "https://llm.internal");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected validation failure".to_string()),
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["CONCIERGE_LLM_BASE_URL"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_LLM_BASE_URL", "https://llm.internal");
        env::set_var("CONCIERGE_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["CONCIERGE_LLM_BASE_URL", "CONCIERGE_LLM_API_KEY"]);
        result
    }
}
