//! Parley SDK
//!
//! Shared library providing traits and types for Parley extension modules.
//! This crate is used by both the engine and the extension crates under
//! `plugins/`.

/// Tool descriptor and handler contract
pub mod tool;

/// Error types and handling
pub mod errors;

/// Tool argument/output types
pub mod types;

/// Registration contract
pub mod registrar;

// Re-export commonly used types
pub use errors::{EngineError, ParleyErrorExt};
pub use registrar::{
    AuthContext, ExtensionModule, PromptTemplate, ProxyEndpoint, Registrar, SCOPE_EXTERNAL_TOOLS,
    SCOPE_PROXY_SPAWN,
};
pub use tool::{
    ThreadContext, ToolCategory, ToolDescriptor, ToolHandler, THREAD_ID_PARAM,
    THREAD_SCOPE_PREFIX,
};
pub use types::{ToolArgs, ToolError, ToolOutput};
