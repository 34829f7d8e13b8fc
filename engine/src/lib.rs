//! Parley Engine Library
//!
//! Conversational orchestration: a routing state machine that plans with a
//! model, serves a built-in retrieval pipeline and registered extension tools,
//! and keeps the model-visible context free of internal retrieval records.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// LLM provider abstraction layer
pub mod llm;

/// Conversation threads and their messages
pub mod thread;

/// Tool and prompt registry built once at startup
pub mod registry;

/// Subprocess-backed tool handlers
pub mod proxy;

/// Prompt override store
pub mod prompts;

/// Retrieval pipeline: rephrase, select, grade, format
pub mod retrieval;

/// Turn state machine, context sanitizer and metadata emitter
pub mod agent;

/// Database persistence module
pub mod db;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
