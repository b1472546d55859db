//! Process configuration from the environment

use crate::agents::Topology;
use crate::llm::{LlmConfig, SupportedModel, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use crate::runtime::DEFAULT_MAX_STEPS;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("Unknown log format: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub topology: Topology,
    /// SQLite session database; sessions stay in memory when unset
    pub db_path: Option<PathBuf>,
    /// JSON dealership records; seeded stock in memory when unset
    pub store_path: Option<PathBuf>,
    pub max_steps: usize,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let model = match var("DEALERSHIP_MODEL") {
            Some(raw) => raw
                .trim()
                .parse::<SupportedModel>()
                .map_err(|e| ConfigError::Invalid {
                    var: "DEALERSHIP_MODEL",
                    reason: e.to_string(),
                })?,
            None => SupportedModel::default(),
        };
        let llm = LlmConfig {
            model,
            base_url: var("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: var("LLM_API_KEY"),
            timeout: positive(var("LLM_TIMEOUT_SECS"), "LLM_TIMEOUT_SECS")?
                .map_or(DEFAULT_TIMEOUT, Duration::from_secs),
        };

        Ok(Self {
            llm,
            topology: parse_or_default(var("DEALERSHIP_TOPOLOGY"), "DEALERSHIP_TOPOLOGY")?,
            db_path: var("DEALERSHIP_DB_PATH").map(PathBuf::from),
            store_path: var("DEALERSHIP_STORE_PATH").map(PathBuf::from),
            max_steps: positive(var("DEALERSHIP_MAX_STEPS"), "DEALERSHIP_MAX_STEPS")?
                .unwrap_or(DEFAULT_MAX_STEPS),
            log_format: parse_or_default(var("DEALERSHIP_LOG_FORMAT"), "DEALERSHIP_LOG_FORMAT")?,
        })
    }
}

/// Unsigned integer settings where zero would disable the thing configured
fn positive<T>(raw: Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialEq,
{
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(n) if n != T::default() => Ok(Some(n)),
        _ => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a positive integer, got {raw}"),
        }),
    }
}

fn parse_or_default<T>(raw: Option<String>, var: &'static str) -> Result<T, ConfigError>
where
    T: FromStr<Err = String> + Default,
{
    raw.map_or_else(
        || Ok(T::default()),
        |raw| raw.parse().map_err(|reason| ConfigError::Invalid { var, reason }),
    )
}
