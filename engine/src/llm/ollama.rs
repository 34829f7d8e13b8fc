//! Ollama LLM Provider
//!
//! This module implements the LLMProvider trait for Ollama, a local LLM provider.
//! Ollama runs models locally on the user's machine, typically at http://localhost:11434.
//!
//! Key features:
//! - Local execution (no API keys required)
//! - Native tool calling through the `tools` request field
//! - Fallback parsing of tool calls printed as text by smaller models
//! - Token accounting from `prompt_eval_count` / `eval_count`

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    new_call_id, FinalAnswer, Generation, LLMError, LLMProvider, LLMResponse, Message, Result,
    TokenUsage, ToolCall, ToolSchema,
};

/// Default HTTP timeout for a single chat request
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// Model name to use (e.g., "llama3.1:8b")
    model: String,

    /// HTTP client for API requests
    client: Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g., "http://localhost:11434")
    /// * `model` - Model name to use (e.g., "llama3.1:8b")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(base_url, model, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a provider with an explicit HTTP timeout
    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Convert our Message format to Ollama's format
    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: msg.role.to_string(),
                content: msg.content.clone(),
                tool_calls: msg
                    .tool_calls
                    .iter()
                    .map(|call| OllamaToolCall {
                        function: OllamaFunction {
                            name: call.name.clone(),
                            arguments: serde_json::from_str(&call.arguments)
                                .unwrap_or_else(|_| serde_json::json!({})),
                        },
                    })
                    .collect(),
            })
            .collect()
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Generation> {
        let ollama_messages = self.convert_messages(messages);

        tracing::debug!(
            model = %self.model,
            messages = ollama_messages.len(),
            tools = tools.len(),
            total_chars = ollama_messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "Ollama request"
        );

        let request = OllamaRequest {
            model: self.model.clone(),
            messages: ollama_messages,
            tools: tools.iter().map(ToolSchema::to_function_json).collect(),
            stream: false,
        };

        let url = format!("{}/api/chat", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Ollama response received"
        );

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderUnavailable(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        let usage = TokenUsage::new(
            ollama_response.prompt_eval_count.unwrap_or(0),
            ollama_response.eval_count.unwrap_or(0),
        );
        let message = ollama_response.message;

        if !message.tool_calls.is_empty() {
            let calls = message
                .tool_calls
                .into_iter()
                .map(|call| {
                    ToolCall::new(
                        new_call_id(),
                        call.function.name,
                        call.function.arguments.to_string(),
                    )
                })
                .collect();
            return Ok(Generation::new(LLMResponse::ToolCalls { calls }, usage));
        }

        // Smaller models sometimes print the call instead of using the tool channel
        let response = match super::parse_tool_calls(&message.content) {
            Some(call) => LLMResponse::ToolCalls { calls: vec![call] },
            None => LLMResponse::FinalAnswer(FinalAnswer::new(message.content)),
        };
        Ok(Generation::new(response, usage))
    }
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    stream: bool,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Ollama API response format
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_provider_name() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b");
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn test_message_conversion() {
        let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b");

        let messages = vec![
            Message::system("You are a helpful assistant"),
            Message::user("Hello"),
            Message::assistant_with_tools(
                "",
                vec![ToolCall::new("call_1", "search_documents", r#"{"query": "port"}"#)],
            ),
            Message::tool_result("ok", "call_1"),
        ];

        let ollama_messages = provider.convert_messages(&messages);

        assert_eq!(ollama_messages.len(), 4);
        assert_eq!(ollama_messages[0].role, "system");
        assert_eq!(ollama_messages[1].role, "user");
        assert_eq!(ollama_messages[2].role, "assistant");
        assert_eq!(ollama_messages[2].tool_calls[0].function.name, "search_documents");
        assert_eq!(
            ollama_messages[2].tool_calls[0].function.arguments["query"],
            "port"
        );
        assert_eq!(ollama_messages[3].role, "tool");
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let request = OllamaRequest {
            model: "m".to_string(),
            messages: Vec::new(),
            tools: Vec::new(),
            stream: false,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("tools"));
    }
}
