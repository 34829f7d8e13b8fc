use super::{
    new_call_id, FinalAnswer, Generation, LLMError, LLMProvider, LLMResponse, Message,
    MessageRole, TokenUsage, ToolCall, ToolSchema,
};
use crate::config::OpenAIConfig;
use async_trait::async_trait;
use serde_json::{json, Value};

/// OpenAI-compatible chat completions provider
///
/// The API key is read from the environment variable named by
/// `OpenAIConfig::api_key_env` on every call, never from the config file.
pub struct OpenAIProvider {
    config: OpenAIConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_key(&self) -> super::Result<String> {
        std::env::var(&self.config.api_key_env).map_err(|_| {
            LLMError::AuthenticationFailed(format!(
                "environment variable {} is not set",
                self.config.api_key_env
            ))
        })
    }
}

fn convert_message(msg: &Message) -> Value {
    match msg.role {
        MessageRole::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        MessageRole::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content
        }),
        _ => json!({ "role": msg.role.to_string(), "content": msg.content }),
    }
}

fn parse_usage(data: &Value) -> TokenUsage {
    let usage = &data["usage"];
    let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0);
    let completion = usage["completion_tokens"].as_u64().unwrap_or(0);
    let mut parsed = TokenUsage::new(prompt, completion);
    if let Some(total) = usage["total_tokens"].as_u64() {
        parsed.total_tokens = total;
    }
    parsed
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn check_health(&self) -> bool {
        self.api_key().is_ok()
    }

    async fn generate(&self, messages: &[Message], tools: &[ToolSchema]) -> super::Result<Generation> {
        let api_key = self.api_key()?;

        let url = format!("{}/chat/completions", self.config.base_url);

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages.iter().map(convert_message).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools.iter().map(ToolSchema::to_function_json).collect());
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LLMError::AuthenticationFailed(text));
            } else if status.as_u16() == 429 {
                return Err(LLMError::RateLimitExceeded);
            } else {
                return Err(LLMError::InvalidRequest(text));
            }
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let usage = parse_usage(&data);

        let message = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| LLMError::ParseError("No message in response".to_string()))?;

        if let Some(raw_calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
            if !raw_calls.is_empty() {
                let mut calls = Vec::with_capacity(raw_calls.len());
                for raw in raw_calls {
                    let name = raw["function"]["name"].as_str().ok_or_else(|| {
                        LLMError::ParseError("Tool call without function name".to_string())
                    })?;
                    let arguments = raw["function"]["arguments"].as_str().unwrap_or("{}");
                    let id = raw["id"]
                        .as_str()
                        .map(String::from)
                        .unwrap_or_else(new_call_id);
                    calls.push(ToolCall::new(id, name, arguments));
                }
                return Ok(Generation::new(LLMResponse::ToolCalls { calls }, usage));
            }
        }

        match message.get("content").and_then(|c| c.as_str()) {
            Some(content) => Ok(Generation::new(
                LLMResponse::FinalAnswer(FinalAnswer::new(content)),
                usage,
            )),
            None => Err(LLMError::ParseError("Empty content".to_string())),
        }
    }
}
