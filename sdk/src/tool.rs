//! Tool descriptor and handler contract
//!
//! Extension modules describe their capabilities with a `ToolDescriptor` and
//! implement `ToolHandler` for everything in the `External` category. Tools in
//! the `InternalRetrieval` category are served by the engine's retrieval
//! pipeline and are registered without a handler.

use crate::errors::EngineError;
use crate::types::{ToolArgs, ToolOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name prefix that marks a tool as thread-scoped.
///
/// The engine injects the calling thread id into the arguments of these
/// tools under [`THREAD_ID_PARAM`]; the model never supplies it.
pub const THREAD_SCOPE_PREFIX: &str = "thread_";

/// Argument key injected into thread-scoped tool calls
pub const THREAD_ID_PARAM: &str = "thread_id";

/// Category of a tool, deciding which executor serves it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Served by the engine's retrieval pipeline
    InternalRetrieval,

    /// Served by a registered handler or proxy
    External,
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCategory::InternalRetrieval => write!(f, "internal-retrieval"),
            ToolCategory::External => write!(f, "external"),
        }
    }
}

/// Registered metadata describing a callable capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Globally unique tool name
    pub name: String,

    /// Description shown to the model for tool selection
    pub description: String,

    /// JSON schema of the arguments object
    pub input_schema: serde_json::Value,

    /// Which executor serves this tool
    pub category: ToolCategory,

    /// Whether the tool appears in the model's tool list
    pub model_visible: bool,
}

impl ToolDescriptor {
    /// Create a model-visible external tool descriptor
    pub fn external(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            category: ToolCategory::External,
            model_visible: true,
        }
    }

    /// Create a model-visible internal-retrieval tool descriptor
    pub fn internal(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            category: ToolCategory::InternalRetrieval,
            model_visible: true,
        }
    }

    /// Hide the tool from the model's tool list
    pub fn hidden(mut self) -> Self {
        self.model_visible = false;
        self
    }

    /// Whether the engine injects the calling thread id
    pub fn is_thread_scoped(&self) -> bool {
        self.name.starts_with(THREAD_SCOPE_PREFIX)
    }
}

/// Per-call context handed to tool handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadContext {
    /// Calling thread
    pub thread_id: String,

    /// Current turn within the thread
    pub turn_id: String,
}

impl ThreadContext {
    /// Create a new thread context
    pub fn new(thread_id: impl Into<String>, turn_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            turn_id: turn_id.into(),
        }
    }
}

/// Trait that every external tool implementation must implement
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Handle a tool invocation
    async fn handle(&self, args: ToolArgs, ctx: &ThreadContext)
        -> Result<ToolOutput, EngineError>;
}
