//! OpenAI-compatible Chat Completions backend.
//!
//! Works against any endpoint speaking the `/chat/completions` protocol.
//! Non-success responses surface their HTTP status and body.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::{
    ChatMessage, ErrorClassifier, GenerationConfig, GenerationResponse, ModelBackend, ToolCall,
    ToolSpec, TokenUsage,
};
use crate::config::LlmConfig;
use crate::types::{ErrorCategory, LensError, LlmError, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "openai";

/// OpenAI-compatible backend with secure API key handling
pub struct OpenAiBackend {
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key_str = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                LensError::Config(
                    "API key not found. Set OPENAI_API_KEY or llm.api_key in config".to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        // Per-request timeouts are set on each call
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LensError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key_str),
            api_base,
            client,
        })
    }

    fn build_request(messages: &[ChatMessage], config: &GenerationConfig) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: config.model.clone(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            tools: (!config.tools.is_empty())
                .then(|| config.tools.iter().map(WireTool::from).collect()),
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<GenerationResponse> {
        let start_time = Instant::now();
        let request = Self::build_request(messages, config);
        let url = format!("{}/chat/completions", self.api_base);

        debug!(model = %config.model, messages = messages.len(), "Sending chat completion");

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, PROVIDER))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(status.as_u16(), &body, PROVIDER).into());
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            LlmError::with_provider(
                ErrorCategory::Malformed,
                format!("Failed to decode response: {}", e),
                PROVIDER,
            )
        })?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            LlmError::with_provider(ErrorCategory::Malformed, "Response has no choices", PROVIDER)
        })?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        let content = choice.message.content.unwrap_or_default();
        if content.is_empty() && tool_calls.is_empty() {
            return Err(LlmError::with_provider(
                ErrorCategory::Malformed,
                "Response has neither content nor tool calls",
                PROVIDER,
            )
            .into());
        }

        Ok(GenerationResponse {
            content,
            usage: body
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
                .unwrap_or_default(),
            cost_usd: None,
            tool_calls,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            model: body.model.unwrap_or_else(|| config.model.clone()),
            request_id: body
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            elapsed: start_time.elapsed(),
        })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: super::Role,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolSpec> for WireTool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            tool_type: "function",
            function: WireFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let mut config = GenerationConfig::new("gpt-4o-mini");
        config.tools.push(ToolSpec {
            name: "lookup".into(),
            description: "Look up a quote".into(),
            parameters: json!({"type": "object"}),
        });
        let request = OpenAiBackend::build_request(
            &[ChatMessage::system("sys"), ChatMessage::user("hi")],
            &config,
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "lookup");
        assert_eq!(value["max_tokens"], 4000);
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let request =
            OpenAiBackend::build_request(&[ChatMessage::user("hi")], &GenerationConfig::new("m"));
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_response_deserialization() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"code\":\"000001\"}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        let calls = parsed.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "lookup");
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = LlmConfig {
            api_key: Some("sk-very-secret".into()),
            ..LlmConfig::default()
        };
        let backend = OpenAiBackend::new(&config).unwrap();
        let debug = format!("{:?}", backend);
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
