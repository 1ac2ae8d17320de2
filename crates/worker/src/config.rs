use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use patchflow_aws::executor::{MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS};
use patchflow_core::script::ScriptTemplate;
use patchflow_engine::{EngineConfig, PollConfig};

/// Configuration errors. Reported before any AWS or database call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read patch script {}: {source}", path.display())]
    Script {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid patch script {}: {reason}", path.display())]
    Template { path: PathBuf, reason: String },
}

/// Where history records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryBackend {
    DynamoDb,
    Postgres,
}

impl FromStr for HistoryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dynamodb" => Ok(Self::DynamoDb),
            "postgres" => Ok(Self::Postgres),
            other => Err(format!("expected 'dynamodb' or 'postgres', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// Worker configuration loaded from environment variables.
///
/// Values only some subcommands need are optional here and checked with
/// [`WorkerConfig::require`] when used.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub catalog_table: Option<String>,
    pub history_backend: HistoryBackend,
    pub history_table: Option<String>,
    pub database_url: Option<String>,
    pub sns_topic_arn: Option<String>,
    pub max_concurrent_jobs: usize,
    pub execution_timeout_secs: u64,
    pub poll_initial_delay_secs: u64,
    pub poll_max_delay_secs: u64,
    pub poll_timeout_secs: u64,
    pub run_timeout_secs: u64,
    /// Unset means the built-in PowerShell template.
    pub patch_script_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                          |
    /// |---------------------------|----------------------------------|
    /// | `PATCH_CATALOG_TABLE`     | required                         |
    /// | `HISTORY_BACKEND`         | `dynamodb` (or `postgres`)       |
    /// | `PATCH_HISTORY_TABLE`     | required for `dynamodb`          |
    /// | `DATABASE_URL`            | required for `postgres`          |
    /// | `SNS_TOPIC_ARN`           | required for `run`               |
    /// | `MAX_CONCURRENT_JOBS`     | `8`                              |
    /// | `EXECUTION_TIMEOUT_SECS`  | `600` (30 to 2592000)            |
    /// | `POLL_INITIAL_DELAY_SECS` | `2`                              |
    /// | `POLL_MAX_DELAY_SECS`     | `30`                             |
    /// | `POLL_TIMEOUT_SECS`       | `900`                            |
    /// | `RUN_TIMEOUT_SECS`        | `3600`                           |
    /// | `PATCH_SCRIPT_PATH`       | unset (built-in template)        |
    /// | `LOG_FORMAT`              | `text` (or `json`)               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            catalog_table: get("PATCH_CATALOG_TABLE"),
            history_backend: parse_or(&get, "HISTORY_BACKEND", HistoryBackend::DynamoDb)?,
            history_table: get("PATCH_HISTORY_TABLE"),
            database_url: get("DATABASE_URL"),
            sns_topic_arn: get("SNS_TOPIC_ARN"),
            max_concurrent_jobs: positive(&get, "MAX_CONCURRENT_JOBS", 8)?,
            execution_timeout_secs: execution_timeout(&get)?,
            poll_initial_delay_secs: positive(&get, "POLL_INITIAL_DELAY_SECS", 2)?,
            poll_max_delay_secs: positive(&get, "POLL_MAX_DELAY_SECS", 30)?,
            poll_timeout_secs: positive(&get, "POLL_TIMEOUT_SECS", 900)?,
            run_timeout_secs: positive(&get, "RUN_TIMEOUT_SECS", 3600)?,
            patch_script_path: get("PATCH_SCRIPT_PATH").map(PathBuf::from),
            log_format: parse_or(&get, "LOG_FORMAT", LogFormat::Text)?,
        })
    }

    /// Unwrap an optional setting or report it as missing.
    pub fn require<'a>(
        value: &'a Option<String>,
        name: &'static str,
    ) -> Result<&'a str, ConfigError> {
        value.as_deref().ok_or(ConfigError::Missing(name))
    }

    /// Engine tuning, reading the patch script from disk if configured.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let template = match &self.patch_script_path {
            None => ScriptTemplate::default(),
            Some(path) => {
                let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Script {
                    path: path.clone(),
                    source,
                })?;
                ScriptTemplate::new(body).map_err(|e| ConfigError::Template {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
            }
        };

        let initial_delay = Duration::from_secs(self.poll_initial_delay_secs);
        let max_delay = Duration::from_secs(self.poll_max_delay_secs).max(initial_delay);

        Ok(EngineConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            execution_timeout: Duration::from_secs(self.execution_timeout_secs),
            poll: PollConfig {
                initial_delay,
                max_delay,
                deadline: Duration::from_secs(self.poll_timeout_secs),
                ..PollConfig::default()
            },
            run_deadline: Duration::from_secs(self.run_timeout_secs),
            template,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = String>,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
            name,
            value,
            reason,
        }),
    }
}

fn execution_timeout<G>(get: &G) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    const NAME: &str = "EXECUTION_TIMEOUT_SECS";
    let secs: u64 = positive(get, NAME, 600)?;
    let range = MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS;
    if !range.contains(&secs) {
        return Err(ConfigError::Invalid {
            name: NAME,
            value: secs.to_string(),
            reason: format!(
                "must be between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS} seconds"
            ),
        });
    }
    Ok(secs)
}

fn positive<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let Some(value) = get(name) else {
        return Ok(default);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        Ok(_) => Err(ConfigError::Invalid {
            name,
            value,
            reason: "must be greater than zero".to_string(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
