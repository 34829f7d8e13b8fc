//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for model-inference endpoints. The
//! `LLMProvider` trait accepts a message list plus the tool catalog offered for
//! this call, and returns either a final answer or tool invocation requests,
//! together with token counts.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::tool::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ollama;
pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<LLMError> for EngineError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::Timeout => EngineError::LLMTimeout,
            other => EngineError::LLMProvider(other.to_string()),
        }
    }
}

/// Message in the model-visible context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,

    /// Tool invocation requests carried by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Optional tool call ID for tool result messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Create an assistant message requesting tool invocations
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(MessageRole::Assistant, content)
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    /// Create a new tool result message
    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,

    /// Tool result message
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Tool offered to the model for one call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl From<&ToolDescriptor> for ToolSchema {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: descriptor.input_schema.clone(),
        }
    }
}

impl ToolSchema {
    /// OpenAI-style `{"type": "function", "function": {...}}` wrapper, shared
    /// by both HTTP providers
    pub fn to_function_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Token accounting for one or more model calls
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create usage from prompt/completion counts
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Accumulate another call's usage
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LLMResponse {
    /// LLM wants to call one or more tools
    ToolCalls { calls: Vec<ToolCall> },

    /// LLM has provided a final answer
    FinalAnswer(FinalAnswer),
}

/// A provider response together with its token counts
#[derive(Debug, Clone)]
pub struct Generation {
    pub response: LLMResponse,
    pub usage: TokenUsage,
}

impl Generation {
    /// Wrap a response with its usage
    pub fn new(response: LLMResponse, usage: TokenUsage) -> Self {
        Self { response, usage }
    }
}

/// Tool call request from the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,

    /// Name of the tool to call
    pub name: String,

    /// Arguments to pass to the tool (JSON string)
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Final answer from the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    /// The answer content
    pub content: String,
}

impl FinalAnswer {
    /// Create a new final answer
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Generate a response from the LLM
    ///
    /// # Arguments
    /// * `messages` - Sanitized context: system prompt, history, tool results
    /// * `tools` - Tools the model may request for this call (may be empty)
    ///
    /// # Returns
    /// * `Ok(Generation)` - Either tool calls or a final answer, plus usage
    /// * `Err(LLMError)` - If the request fails
    async fn generate(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Generation>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Helper function to parse a tool call from string content.
///
/// Some local models ignore the native tool channel and print the call as
/// text. Handles:
/// 1. Raw JSON: `{"function": "...", "arguments": {...}}`
/// 2. Fenced JSON (with or without trailing text): ` ```json\n{...}\n``` `
/// 3. JSON embedded in prose (scans for `{"function":` anywhere)
pub fn parse_tool_calls(content: &str) -> Option<ToolCall> {
    let trimmed = content.trim();

    // Pattern 1: Raw JSON (entire content is valid JSON with "function" key)
    if let Some(tc) = try_parse_function_json(trimmed) {
        return Some(tc);
    }

    // Pattern 2: Extract from markdown code fences (even with trailing text)
    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(tc) = try_parse_function_json(inner.trim()) {
            return Some(tc);
        }
    }

    // Pattern 3: Scan for {"function": anywhere in the content
    if let Some(pos) = trimmed.find("{\"function\"") {
        let candidate = &trimmed[pos..];
        if let Some(json_str) = extract_balanced_json(candidate) {
            if let Some(tc) = try_parse_function_json(json_str) {
                return Some(tc);
            }
        }
    }

    None
}

/// Generate an id for tool calls whose provider did not assign one
pub(crate) fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Try to parse a string as a `{"function": "...", "arguments": {...}}` tool call.
fn try_parse_function_json(s: &str) -> Option<ToolCall> {
    let json: serde_json::Value = serde_json::from_str(s).ok()?;
    let function = json.get("function")?.as_str()?;
    let arguments = json.get("arguments")?;
    Some(ToolCall::new(new_call_id(), function, arguments.to_string()))
}

/// Extract the body of the first markdown code fence in the text.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::tool::ToolDescriptor;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");
        assert_eq!(user_msg.tool_call_id, None);

        let tool_msg = Message::tool_result("result", "call_123");
        assert_eq!(tool_msg.role, MessageRole::Tool);
        assert_eq!(tool_msg.tool_call_id, Some("call_123".to_string()));

        let call = ToolCall::new("call_1", "search_documents", "{}");
        let with_tools = Message::assistant_with_tools("", vec![call.clone()]);
        assert_eq!(with_tools.role, MessageRole::Assistant);
        assert_eq!(with_tools.tool_calls, vec![call]);
    }

    #[test]
    fn test_message_serialization_skips_empty_tool_calls() {
        let msg = Message::user("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, deserialized);
    }

    #[test]
    fn test_tool_schema_from_descriptor() {
        let descriptor = ToolDescriptor::external(
            "weather",
            "Current weather",
            json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        );
        let schema = ToolSchema::from(&descriptor);
        let function = schema.to_function_json();
        assert_eq!(function["type"], "function");
        assert_eq!(function["function"]["name"], "weather");
        assert_eq!(function["function"]["parameters"]["properties"]["city"]["type"], "string");
    }

    #[test]
    fn test_token_usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage.add(TokenUsage::new(10, 5));
        usage.add(TokenUsage::new(3, 2));
        assert_eq!(usage, TokenUsage::new(13, 7));
        assert_eq!(usage.total_tokens, 20);
    }

    #[test]
    fn test_llm_error_maps_timeout() {
        assert!(matches!(EngineError::from(LLMError::Timeout), EngineError::LLMTimeout));
        assert!(matches!(
            EngineError::from(LLMError::RateLimitExceeded),
            EngineError::LLMProvider(_)
        ));
    }

    #[test]
    fn test_parse_tool_calls_raw_and_fenced() {
        let raw = r#"{"function": "search_documents", "arguments": {"query": "port"}}"#;
        let call = parse_tool_calls(raw).unwrap();
        assert_eq!(call.name, "search_documents");
        assert!(call.id.starts_with("call_"));

        let fenced = "Sure:\n```json\n{\"function\": \"x\", \"arguments\": {}}\n```\nDone";
        assert_eq!(parse_tool_calls(fenced).unwrap().name, "x");
    }

    #[test]
    fn test_parse_tool_calls_embedded_and_plain() {
        let embedded = r#"I will call {"function": "y", "arguments": {"a": "}"}} now"#;
        let call = parse_tool_calls(embedded).unwrap();
        assert_eq!(call.name, "y");
        assert_eq!(call.arguments, r#"{"a":"}"}"#);

        assert!(parse_tool_calls("The default port is 8080.").is_none());
    }

    #[test]
    fn test_llm_response_serialization() {
        let calls = LLMResponse::ToolCalls {
            calls: vec![ToolCall::new("id", "name", "{}")],
        };
        let json = serde_json::to_string(&calls).unwrap();
        assert!(json.contains(r#""type":"tool_calls"#));

        let final_answer = LLMResponse::FinalAnswer(FinalAnswer::new("answer"));
        let json = serde_json::to_string(&final_answer).unwrap();
        assert!(json.contains(r#""type":"final_answer"#));
    }
}
