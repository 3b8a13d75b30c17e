//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Read an optional env var and parse it, failing loudly on a present-but-invalid value.
fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn parse_bool_env(key: &str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{other}'"),
            }),
        },
        Err(_) => Ok(None),
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Which generative backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(LlmBackend::Anthropic),
            "openai" => Ok(LlmBackend::OpenAi),
            other => Err(format!("unknown backend '{other}' (expected anthropic or openai)")),
        }
    }
}

/// Generative backend settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_tokens_unit: u32,
    pub max_tokens_plan: u32,
    pub max_tokens_summary: u32,
}

impl LlmSettings {
    /// Build from env. The API key is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = optional_env("CURRICULUM_LLM_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("CURRICULUM_LLM_API_KEY".to_string()))?;
        let defaults = Self::with_key(SecretString::from(api_key));

        Ok(Self {
            backend: parse_env("CURRICULUM_LLM_BACKEND")?.unwrap_or(defaults.backend),
            model: optional_env("CURRICULUM_LLM_MODEL").unwrap_or(defaults.model),
            temperature: parse_env("CURRICULUM_LLM_TEMPERATURE")?.unwrap_or(defaults.temperature),
            timeout: parse_env::<u64>("CURRICULUM_LLM_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_tokens_unit: parse_env("CURRICULUM_MAX_TOKENS_UNIT")?
                .unwrap_or(defaults.max_tokens_unit),
            max_tokens_plan: parse_env("CURRICULUM_MAX_TOKENS_PLAN")?
                .unwrap_or(defaults.max_tokens_plan),
            max_tokens_summary: parse_env("CURRICULUM_MAX_TOKENS_SUMMARY")?
                .unwrap_or(defaults.max_tokens_summary),
            api_key: defaults.api_key,
        })
    }

    /// Defaults for everything but the key.
    pub fn with_key(api_key: SecretString) -> Self {
        Self {
            backend: LlmBackend::OpenAi,
            api_key,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            timeout: Duration::from_secs(120),
            max_tokens_unit: 1800,
            max_tokens_plan: 2000,
            max_tokens_summary: 900,
        }
    }
}

/// Sweep settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Units below this index are delivered without payment.
    pub free_unit_threshold: usize,
    /// Skip users who already advanced earlier the same UTC day.
    pub daily_throttle: bool,
    /// Wait between publishing a unit and notifying its user.
    pub notify_delay: Duration,
    /// Cron expression for daemon mode.
    pub schedule: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            free_unit_threshold: 10,
            daily_throttle: false,
            notify_delay: Duration::from_secs(300),
            schedule: "0 0 9 * * *".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            free_unit_threshold: parse_env("CURRICULUM_FREE_UNITS")?
                .unwrap_or(defaults.free_unit_threshold),
            daily_throttle: parse_bool_env("CURRICULUM_DAILY_THROTTLE")?
                .unwrap_or(defaults.daily_throttle),
            notify_delay: parse_env::<u64>("CURRICULUM_NOTIFY_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.notify_delay),
            schedule: optional_env("CURRICULUM_SCHEDULE").unwrap_or(defaults.schedule),
        })
    }
}

/// Progress store location.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: optional_env("CURRICULUM_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/curriculum.db")),
        }
    }
}

/// Where published pages go.
#[derive(Debug, Clone)]
pub enum PublishConfig {
    /// Write files under `root`, served from `base_url`.
    LocalDir { root: PathBuf, base_url: String },
    /// Commit files to a GitHub Pages repository.
    GitHub {
        token: SecretString,
        owner: String,
        repo: String,
        branch: String,
        /// Per-request limit for the contents API.
        timeout: Duration,
    },
}

impl PublishConfig {
    /// GitHub wins when a token is present; otherwise a local directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Some(token) = optional_env("GITHUB_TOKEN") {
            let owner = optional_env("GITHUB_REPO_OWNER")
                .ok_or_else(|| ConfigError::MissingEnvVar("GITHUB_REPO_OWNER".to_string()))?;
            let repo = optional_env("GITHUB_REPO_NAME")
                .ok_or_else(|| ConfigError::MissingEnvVar("GITHUB_REPO_NAME".to_string()))?;
            return Ok(PublishConfig::GitHub {
                token: SecretString::from(token),
                owner,
                repo,
                branch: optional_env("GITHUB_BRANCH").unwrap_or_else(|| "main".to_string()),
                timeout: parse_env::<u64>("CURRICULUM_PUBLISH_TIMEOUT_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(Duration::from_secs(60)),
            });
        }

        Ok(PublishConfig::LocalDir {
            root: optional_env("CURRICULUM_PUBLISH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./public")),
            base_url: optional_env("CURRICULUM_PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
        })
    }
}

/// SMTP settings for learner notifications.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl EmailConfig {
    /// Returns `None` if `SMTP_HOST` is not set (notifications are log-only).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(smtp_host) = optional_env("SMTP_HOST") else {
            return Ok(None);
        };
        let username = optional_env("SMTP_USERNAME").unwrap_or_default();
        Ok(Some(Self {
            smtp_host,
            smtp_port: parse_env("SMTP_PORT")?.unwrap_or(587),
            password: SecretString::from(optional_env("SMTP_PASSWORD").unwrap_or_default()),
            from_address: optional_env("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone()),
            username,
        }))
    }
}

/// Operational alerting settings.
#[derive(Debug, Clone, Default)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
}

impl AlertConfig {
    pub fn from_env() -> Self {
        Self {
            webhook_url: optional_env("ALERT_WEBHOOK_URL"),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for a daily-rolling log file, in addition to stderr.
    pub log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            log_dir: optional_env("CURRICULUM_LOG_DIR").map(PathBuf::from),
        }
    }
}
