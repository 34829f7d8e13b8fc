//! Subprocess tool proxy
//!
//! Each invocation spawns the endpoint's command, writes one JSON request to
//! its stdin and reads the result from stdout:
//!
//! ```text
//! stdin:  {"tool": "...", "arguments": {...}, "thread_id": "...", "turn_id": "..."}
//! stdout: JSON value (returned as JSON) or plain text
//! ```
//!
//! A non-zero exit status is a structured `EngineError::Proxy`.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::registrar::ProxyEndpoint;
use sdk::tool::{ThreadContext, ToolHandler};
use sdk::types::{ToolArgs, ToolOutput};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Stderr is truncated to this many bytes in error messages
const MAX_STDERR_BYTES: usize = 2048;

/// Handler forwarding one tool to a subprocess endpoint
pub struct ProxyHandler {
    endpoint: Arc<ProxyEndpoint>,
    tool: String,
}

impl ProxyHandler {
    pub fn new(endpoint: Arc<ProxyEndpoint>, tool: impl Into<String>) -> Self {
        Self {
            endpoint,
            tool: tool.into(),
        }
    }

    fn request_body(&self, args: &ToolArgs, ctx: &ThreadContext) -> Result<Vec<u8>, EngineError> {
        let request = serde_json::json!({
            "tool": self.tool,
            "arguments": args.as_value(),
            "thread_id": ctx.thread_id,
            "turn_id": ctx.turn_id,
        });
        serde_json::to_vec(&request)
            .map_err(|e| EngineError::Proxy(format!("Failed to encode request: {}", e)))
    }
}

#[async_trait]
impl ToolHandler for ProxyHandler {
    async fn handle(&self, args: ToolArgs, ctx: &ThreadContext) -> Result<ToolOutput, EngineError> {
        let body = self.request_body(&args, ctx)?;

        debug!(
            endpoint = %self.endpoint.name,
            tool = %self.tool,
            "Spawning proxy"
        );

        let mut child = Command::new(&self.endpoint.command)
            .args(&self.endpoint.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Proxy(format!(
                    "Failed to spawn '{}': {}",
                    self.endpoint.command, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&body)
                .await
                .map_err(|e| EngineError::Proxy(format!("Failed to write request: {}", e)))?;
            // Dropping stdin closes the pipe so the child sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Proxy(format!("Failed to read proxy output: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = truncate(stderr.trim(), MAX_STDERR_BYTES);
            return Err(EngineError::Proxy(format!(
                "'{}' exited with {}: {}",
                self.endpoint.name, output.status, stderr
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        Ok(match serde_json::from_str::<serde_json::Value>(stdout) {
            Ok(value) => ToolOutput::json(value),
            Err(_) => ToolOutput::text(stdout),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use sdk::tool::ToolDescriptor;
    use serde_json::json;

    fn endpoint(command: &str, args: &[&str]) -> Arc<ProxyEndpoint> {
        Arc::new(ProxyEndpoint {
            name: "test-proxy".to_string(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            tools: vec![ToolDescriptor::external(
                "query_records",
                "Query",
                json!({"type": "object"}),
            )],
        })
    }

    #[tokio::test]
    async fn test_echoes_request_as_json() {
        // `cat` echoes the request back, which is valid JSON
        let handler = ProxyHandler::new(endpoint("cat", &[]), "query_records");
        let args = ToolArgs::new().with_param("query", json!("select 1"));
        let output = handler
            .handle(args, &ThreadContext::new("t1", "turn1"))
            .await
            .unwrap();

        match output {
            ToolOutput::Json(value) => {
                assert_eq!(value["tool"], "query_records");
                assert_eq!(value["arguments"]["query"], "select 1");
                assert_eq!(value["thread_id"], "t1");
            }
            other => panic!("expected json output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let handler = ProxyHandler::new(
            endpoint("sh", &["-c", "echo boom >&2; exit 3"]),
            "query_records",
        );
        let err = handler
            .handle(ToolArgs::new(), &ThreadContext::new("t1", "turn1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Proxy(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_plain_text_output() {
        let handler = ProxyHandler::new(
            endpoint("sh", &["-c", "cat > /dev/null; echo two rows"]),
            "query_records",
        );
        let output = handler
            .handle(ToolArgs::new(), &ThreadContext::new("t1", "turn1"))
            .await
            .unwrap();
        assert_eq!(output.render(), "two rows");
    }

    #[tokio::test]
    async fn test_missing_command() {
        let handler = ProxyHandler::new(endpoint("/nonexistent/parley-proxy", &[]), "query_records");
        let err = handler
            .handle(ToolArgs::new(), &ThreadContext::new("t1", "turn1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
