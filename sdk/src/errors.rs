//! Error types and handling
//!
//! This module provides the error types used throughout the Parley engine and
//! by extension modules. All errors implement the `ParleyErrorExt` trait which
//! provides user-friendly hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Error messages carry diagnostic detail for logs. They are never shown to
//! the end user directly: the conversation layer only surfaces `user_hint()`
//! text, which is static and free of internal detail.

use thiserror::Error;

/// Trait for Parley error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait ParleyErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain:
    /// - Secrets (API keys, tokens, passwords)
    /// - Tool arguments or raw tool output
    /// - Internal implementation details
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors only affect the current turn. Non-recoverable
    /// errors mean the process must not continue (for example an
    /// inconsistent tool catalog at startup).
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: SQLite operation failures
/// - **LLM Provider**: API failures, timeouts
/// - **Registry**: Name collisions, malformed descriptors (fatal at startup)
/// - **Tools**: Unknown tools, handler failures, proxy failures
/// - **Turn**: Recursion guard, cancellation
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ParleyErrorExt};
///
/// let error = EngineError::ToolNotFound("weather".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::NameCollision {
///     name: "search".to_string(),
///     first: "core".to_string(),
///     second: "notes".to_string(),
/// };
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("LLM call timed out")]
    LLMTimeout,

    // Registry errors
    #[error("Name '{name}' registered by both '{first}' and '{second}'")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("Malformed descriptor '{name}': {reason}")]
    MalformedDescriptor { name: String, reason: String },

    #[error("Extension module '{0}' discovered more than once")]
    DuplicateModule(String),

    #[error("Registration rejected for module '{module}': {reason}")]
    RegistrationDenied { module: String, reason: String },

    // Prompt errors
    #[error("Unknown prompt: {0}")]
    UnknownPrompt(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool not enabled for this thread: {0}")]
    ToolDisabled(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool '{0}' timed out")]
    ToolTimeout(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    // Turn errors
    #[error("Recursion limit of {limit} exceeded")]
    RecursionLimitExceeded { limit: usize },

    #[error("Turn cancelled")]
    Cancelled,

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParleyErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",

            // Database errors
            Self::Database(_) => "Conversation storage is unavailable. Try again shortly",

            // LLM provider errors
            Self::LLMProvider(_) => "The assistant is unavailable right now. Try again shortly",
            Self::LLMTimeout => "The assistant took too long to respond. Try again",

            // Registry errors
            Self::NameCollision { .. }
            | Self::MalformedDescriptor { .. }
            | Self::DuplicateModule(_)
            | Self::RegistrationDenied { .. } => "The service is misconfigured and cannot start",

            // Prompt errors
            Self::UnknownPrompt(_) => "The requested prompt does not exist",

            // Tool errors
            Self::ToolNotFound(_) | Self::ToolDisabled(_) => {
                "The requested capability is not available"
            }
            Self::ToolError(_) | Self::Proxy(_) | Self::InvalidArguments(_) => {
                "Something went wrong while handling your request"
            }
            Self::ToolTimeout(_) => "A step took too long to complete. Try again",

            // Turn errors
            Self::RecursionLimitExceeded { .. } => {
                "This request needed too many steps. Try breaking it into smaller questions"
            }
            Self::Cancelled => "The request was cancelled",

            // Generic IO error
            Self::Io(_) => "Something went wrong while handling your request",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::NameCollision { .. }
            | Self::MalformedDescriptor { .. }
            | Self::DuplicateModule(_)
            | Self::RegistrationDenied { .. }
            | Self::Config(_) => false,

            // Everything else only affects the current turn
            _ => true,
        }
    }
}
