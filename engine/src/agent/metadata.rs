//! Side-channel turn metadata
//!
//! Token accounting and retrieval metadata travel on the final assistant
//! message's `metadata` field and in a `tracing` event. None of it is ever
//! placed in the text the model reads.

use crate::llm::TokenUsage;
use serde::{Deserialize, Serialize};
use tracing::info;

/// What the retrieval pipeline did during a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalMetadata {
    pub sources: Vec<String>,
    pub rephrased_query: String,
    pub passage_count: usize,
    pub relevant: bool,
}

/// Metadata attached to the final assistant message of a turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub turn_id: String,
    pub usage: TokenUsage,
    /// Absent when the turn did not use the retrieval pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalMetadata>,
    /// Set on turns that ended with a generic failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_reference: Option<String>,
}

/// Collects metadata over the course of one turn
#[derive(Debug, Default)]
pub struct MetadataEmitter {
    turn_id: String,
    usage: TokenUsage,
    retrieval: Option<RetrievalMetadata>,
    support_reference: Option<String>,
}

impl MetadataEmitter {
    pub fn new(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            ..Self::default()
        }
    }

    /// Add the token counts of one model call
    pub fn record_usage(&mut self, usage: TokenUsage) {
        self.usage.add(usage);
    }

    /// Record the retrieval run of this turn (the first one wins)
    pub fn record_retrieval(&mut self, retrieval: RetrievalMetadata) {
        if self.retrieval.is_none() {
            self.retrieval = Some(retrieval);
        }
    }

    pub fn record_support_reference(&mut self, reference: impl Into<String>) {
        self.support_reference = Some(reference.into());
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Close the turn and emit its metadata event
    pub fn finish(self) -> MessageMetadata {
        info!(
            turn_id = %self.turn_id,
            prompt_tokens = self.usage.prompt_tokens,
            completion_tokens = self.usage.completion_tokens,
            total_tokens = self.usage.total_tokens,
            retrieval_used = self.retrieval.is_some(),
            sources = ?self.retrieval.as_ref().map(|r| &r.sources),
            passage_count = self.retrieval.as_ref().map(|r| r.passage_count),
            "Turn metadata"
        );

        MessageMetadata {
            turn_id: self.turn_id,
            usage: self.usage,
            retrieval: self.retrieval,
            support_reference: self.support_reference,
        }
    }
}
