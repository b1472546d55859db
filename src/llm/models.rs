//! Supported model definitions and service construction

use super::{LlmError, LlmService, LoggingService, OpenAIService, TimeoutService};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Local Ollama endpoint speaking the `OpenAI` chat completions dialect
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Default deadline for one completion call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Models the assistant has been tuned against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupportedModel {
    Llama31_8b,
    Llama32,
    Mistral7b,
    #[default]
    Qwen25_14b,
}

impl SupportedModel {
    pub const ALL: [SupportedModel; 4] = [
        SupportedModel::Llama31_8b,
        SupportedModel::Llama32,
        SupportedModel::Mistral7b,
        SupportedModel::Qwen25_14b,
    ];

    pub fn api_name(self) -> &'static str {
        match self {
            SupportedModel::Llama31_8b => "llama3.1:8b",
            SupportedModel::Llama32 => "llama3.2",
            SupportedModel::Mistral7b => "mistral:7b",
            SupportedModel::Qwen25_14b => "qwen2.5:14b",
        }
    }
}

impl fmt::Display for SupportedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for SupportedModel {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.api_name() == s)
            .ok_or_else(|| LlmError::invalid_request(format!("LLM not supported: {s}")))
    }
}

/// Configuration for the model adapter
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: SupportedModel,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: SupportedModel::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Build the production service: provider, deadline, then logging
pub fn build_service(config: &LlmConfig) -> Result<Arc<dyn LlmService>, LlmError> {
    let provider: Arc<dyn LlmService> = Arc::new(OpenAIService::new(
        config.model,
        &config.base_url,
        config.api_key.clone(),
    )?);
    let bounded: Arc<dyn LlmService> = Arc::new(TimeoutService::new(provider, config.timeout));
    Ok(Arc::new(LoggingService::new(bounded)))
}
