//! Tool argument/output types

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arguments passed to a tool handler
///
/// Wraps the JSON object produced by the model (plus any engine-injected
/// fields such as `thread_id` for thread-scoped tools).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs {
    params: Map<String, Value>,
}

impl ToolArgs {
    /// Create empty arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse arguments from the raw JSON string emitted by the model
    ///
    /// An empty string is treated as `{}`. Anything that is not a JSON object
    /// is rejected.
    pub fn from_json_str(raw: &str) -> Result<Self, ToolError> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(params)) => Ok(Self { params }),
            Ok(other) => Err(ToolError::InvalidParameter(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            ))),
            Err(e) => Err(ToolError::InvalidParameter(e.to_string())),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Insert a parameter, replacing any existing value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.params.insert(key.into(), value);
    }

    /// Whether a parameter is present
    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an i64 parameter
    pub fn param_i64(&self, key: &str) -> Result<i64, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get a bool parameter
    pub fn param_bool(&self, key: &str) -> Result<bool, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an optional i64 parameter
    pub fn param_i64_opt(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(|v| v.as_i64())
    }

    /// Get a parameter as a JSON value
    pub fn param_json(&self, key: &str) -> Result<&Value, ToolError> {
        self.params
            .get(key)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// The full argument object
    pub fn as_value(&self) -> Value {
        Value::Object(self.params.clone())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed result of a successful tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ToolOutput {
    /// Plain text result
    Text(String),

    /// Structured result
    Json(Value),
}

impl ToolOutput {
    /// Create a text output
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a JSON output
    pub fn json(data: Value) -> Self {
        Self::Json(data)
    }

    /// Render the output as the content of a tool-result message
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(data) => data.to_string(),
        }
    }
}

/// Argument-level errors raised by tool handlers
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<ToolError> for EngineError {
    fn from(err: ToolError) -> Self {
        EngineError::InvalidArguments(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_str_object() {
        let args = ToolArgs::from_json_str(r#"{"path": "a.txt", "limit": 3}"#).unwrap();
        assert_eq!(args.param_str("path").unwrap(), "a.txt");
        assert_eq!(args.param_i64("limit").unwrap(), 3);
    }

    #[test]
    fn test_from_json_str_empty_is_empty_object() {
        let args = ToolArgs::from_json_str("  ").unwrap();
        assert_eq!(args, ToolArgs::new());
    }

    #[test]
    fn test_from_json_str_rejects_non_object() {
        let err = ToolArgs::from_json_str("[1, 2]").unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameter(_)));
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_param_str_missing() {
        let args = ToolArgs::new();
        let result = args.param_str("missing");
        assert!(matches!(result.unwrap_err(), ToolError::MissingParameter(_)));
    }

    #[test]
    fn test_param_bool_and_optional() {
        let args = ToolArgs::new()
            .with_param("enabled", json!(true))
            .with_param("name", json!("Bob"));

        assert!(args.param_bool("enabled").unwrap());
        assert_eq!(args.param_str_opt("name"), Some("Bob".to_string()));
        assert_eq!(args.param_str_opt("other"), None);
        assert_eq!(args.param_i64_opt("enabled"), None);
    }

    #[test]
    fn test_insert_overrides() {
        let mut args = ToolArgs::new().with_param("thread_id", json!("spoofed"));
        args.insert("thread_id", json!("t-1"));
        assert_eq!(args.param_str("thread_id").unwrap(), "t-1");
        assert!(args.contains("thread_id"));
    }

    #[test]
    fn test_tool_output_render() {
        assert_eq!(ToolOutput::text("hello").render(), "hello");
        assert_eq!(ToolOutput::json(json!({"n": 1})).render(), r#"{"n":1}"#);
    }

    #[test]
    fn test_tool_error_converts_to_engine_error() {
        let err: EngineError = ToolError::MissingParameter("note".to_string()).into();
        assert!(matches!(err, EngineError::InvalidArguments(_)));
        assert_eq!(err.to_string(), "Invalid tool arguments: Missing parameter: note");
    }
}
