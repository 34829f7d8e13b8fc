//! Conversation turn processing
//!
//! `core` holds the routing state machine, `context` the sanitizer that
//! builds every planning call's message list, and `metadata` the side-channel
//! emitter for token and retrieval accounting.

pub mod context;
pub mod core;
pub mod metadata;

pub use context::build_context;
pub use core::{Orchestrator, TurnLimits, TurnOutcome, TurnState, TurnStatus};
pub use metadata::{MessageMetadata, MetadataEmitter, RetrievalMetadata};
