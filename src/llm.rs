//! LLM provider abstraction
//!
//! The router only sees `LlmService`: history and tool schemas in, one
//! assistant message out. Concrete providers are wrapped in `TimeoutService`
//! and `LoggingService` by `build_service`.

mod error;
mod models;
mod openai;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use models::{build_service, LlmConfig, SupportedModel, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use openai::OpenAIService;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: LlmService + ?Sized> LlmService for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        tracing::debug!(
            model = %self.model_id,
            messages = request.messages.len(),
            tools_offered = request.tools.len(),
            "Calling model"
        );
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    tool_calls = response.message.tool_calls.len(),
                    "Model answered"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    kind = %e.kind,
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Model call failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Bounds every completion call with a deadline
pub struct TimeoutService {
    inner: Arc<dyn LlmService>,
    timeout: Duration,
}

impl TimeoutService {
    pub fn new(inner: Arc<dyn LlmService>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl LlmService for TimeoutService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::timeout(format!(
                "No response from {} within {}s",
                self.inner.model_id(),
                self.timeout.as_secs()
            ))),
        }
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
