//! Model Backend Abstraction
//!
//! Defines the `ModelBackend` trait: a uniform chat-style request/response
//! surface over a remote text-generation service. Every backend returns a
//! `GenerationResponse` with token usage for cost tracking.
//!
//! ## Modules
//!
//! - `openai`: OpenAI-compatible chat-completions backend
//! - `registry`: immutable model info and per-1K-token rate table
//! - `retry`: bounded exponential backoff with escalating timeouts

mod openai;
mod registry;
mod retry;

pub use openai::OpenAiBackend;
pub use registry::{ModelInfo, ModelRegistry};
pub use retry::{RetryPolicy, generate_with_retry};

pub use crate::types::{ErrorCategory, ErrorClassifier, LlmError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::types::{LensError, Result, ValidationError};

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Function tool offered to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments
    pub parameters: Value,
}

/// Per-request generation settings
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    /// 0.0-1.0
    pub temperature: f32,
    /// 0.0-1.0
    pub top_p: f32,
    pub max_tokens: u32,
    /// Set by the retry loop for each attempt
    pub timeout: Option<Duration>,
    pub tools: Vec<ToolSpec>,
}

impl GenerationConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: crate::constants::generation::DEFAULT_TEMPERATURE,
            top_p: crate::constants::generation::DEFAULT_TOP_P,
            max_tokens: crate::constants::generation::DEFAULT_MAX_TOKENS,
            timeout: None,
            tools: Vec::new(),
        }
    }

    pub fn from_llm_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            timeout: None,
            tools: Vec::new(),
        }
    }

    /// Reject out-of-range settings before any network call
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ValidationError::range(
                "temperature",
                format!("must be within [0, 1], got {}", self.temperature),
            )
            .into());
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ValidationError::range(
                "top_p",
                format!("must be within [0, 1], got {}", self.top_p),
            )
            .into());
        }
        if self.max_tokens == 0 {
            return Err(ValidationError::range("max_tokens", "must be greater than 0").into());
        }
        Ok(())
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Token usage metrics for cost tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used (input + output)
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model
    pub arguments: String,
}

/// Complete backend response including content and usage
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// None when the model has no rate data
    pub cost_usd: Option<f64>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub model: String,
    pub request_id: String,
    pub elapsed: Duration,
}

impl GenerationResponse {
    /// Response with content only (usage unknown)
    pub fn content_only(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            cost_usd: None,
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            model: model.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Shared backend type for concurrent access across pipeline stages.
pub type SharedBackend = Arc<dyn ModelBackend>;

// =============================================================================
// Model Backend Trait
// =============================================================================

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send one chat request. Errors must carry HTTP status and body when available.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<GenerationResponse>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Create a shared backend from configuration
pub fn create_backend(config: &LlmConfig) -> Result<SharedBackend> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiBackend::new(config)?)),
        other => Err(LensError::Config(format!(
            "Unknown provider: {}. Supported: openai",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(GenerationConfig::new("gpt-4o-mini").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = GenerationConfig::new("m");
        config.temperature = 1.2;
        assert!(matches!(config.validate(), Err(LensError::Validation(_))));

        let mut config = GenerationConfig::new("m");
        config.top_p = -0.1;
        assert!(matches!(config.validate(), Err(LensError::Validation(_))));

        let mut config = GenerationConfig::new("m");
        config.max_tokens = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_token_usage_add() {
        let mut usage = TokenUsage::new(100, 50);
        usage.add(&TokenUsage::new(10, 5));
        assert_eq!(usage.total(), 165);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = LlmConfig {
            provider: "carrier-pigeon".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(create_backend(&config), Err(LensError::Config(_))));
    }
}
