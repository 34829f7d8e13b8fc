//! Registration contract for extension modules
//!
//! At startup the engine hands every extension module a `Registrar` and an
//! `AuthContext`. A module registers tool descriptors (with handlers for
//! external tools), prompt templates, and subprocess proxy endpoints. The
//! engine rejects duplicate names across modules; the module does not need to
//! check for them itself.

use crate::errors::EngineError;
use crate::tool::{ToolDescriptor, ToolHandler};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Scope required to register external tools
pub const SCOPE_EXTERNAL_TOOLS: &str = "tools:external";

/// Scope required to register subprocess proxy endpoints
pub const SCOPE_PROXY_SPAWN: &str = "proxy:spawn";

/// A named prompt with its built-in default text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub default_text: String,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(name: impl Into<String>, default_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_text: default_text.into(),
        }
    }
}

/// A subprocess that serves one or more external tools
///
/// The engine spawns `command args...` per invocation, writes a JSON request
/// to its stdin and reads the tool result from its stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub tools: Vec<ToolDescriptor>,
}

/// Authorization context granted to extension modules at registration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Identity the engine runs as
    pub principal: String,

    /// Granted scopes
    pub scopes: BTreeSet<String>,
}

impl AuthContext {
    /// Create a context with the given scopes
    pub fn new<I, S>(principal: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal: principal.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the scope has been granted
    pub fn allows(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Fail with `RegistrationDenied` unless the scope has been granted
    pub fn require(&self, module: &str, scope: &str) -> Result<(), EngineError> {
        if self.allows(scope) {
            Ok(())
        } else {
            Err(EngineError::RegistrationDenied {
                module: module.to_string(),
                reason: format!("scope '{}' not granted to {}", scope, self.principal),
            })
        }
    }
}

/// Registry handle passed to extension modules (implemented by the engine)
pub trait Registrar {
    /// Register a tool; external tools must come with a handler
    fn register_tool(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Option<Arc<dyn ToolHandler>>,
    ) -> Result<(), EngineError>;

    /// Register a prompt template
    fn register_prompt(&mut self, template: PromptTemplate) -> Result<(), EngineError>;

    /// Register a subprocess proxy endpoint and all tools it serves
    fn register_proxy(&mut self, endpoint: ProxyEndpoint) -> Result<(), EngineError>;
}

/// An extension module with a fixed registration entry point
pub trait ExtensionModule: Send + Sync {
    /// Unique module name
    fn name(&self) -> &str;

    /// Register everything this module provides
    fn register(&self, registrar: &mut dyn Registrar, auth: &AuthContext)
        -> Result<(), EngineError>;
}
