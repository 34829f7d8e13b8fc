//! Internal Retrieval Pipeline
//!
//! Runs when the model calls the retrieval tool:
//!
//! 1. **Rephrase** the question into a standalone query (only with enough history)
//! 2. **Select** compatible sources and fetch top-K passages from each
//! 3. **Grade** the passages with a binary relevance judgement
//! 4. **Format** a context block when relevant
//!
//! No stage can end the turn. Every failure falls back (original question,
//! empty passage set, relevant = yes) and is logged at `warn`.

pub mod index;
pub mod select;
pub mod stages;

use crate::agent::metadata::RetrievalMetadata;
use crate::config::RetrievalConfig;
use crate::llm::{LLMProvider, TokenUsage};
use crate::prompts::{render, PromptStore};
use crate::registry::builtin::{PROMPT_CONTEXT_BLOCK, PROMPT_GRADE, PROMPT_REPHRASE};
use crate::registry::Catalog;
use crate::thread::Thread;
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use index::InMemoryPassageIndex;

/// One retrieved passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source: String,
    pub content: String,
    pub score: f64,
}

/// Vector/passage source collaborator
#[async_trait]
pub trait PassageLookup: Send + Sync {
    /// Up to `top_k` ranked passages from each of `sources`
    async fn search(
        &self,
        query: &str,
        sources: &[String],
        top_k: usize,
    ) -> Result<Vec<Passage>, EngineError>;
}

/// Transient result of one retrieval run
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalArtifact {
    pub original_question: String,
    pub rephrased_query: String,
    /// Whether the rephrase stage produced `rephrased_query`
    pub rephrased: bool,
    pub sources: Vec<String>,
    pub passages: Vec<Passage>,
    pub relevant: bool,
}

impl RetrievalArtifact {
    /// Full payload for the ephemeral audit record
    pub fn audit_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "original_question": self.original_question,
            "rephrased_query": self.rephrased_query,
            "rephrased": self.rephrased,
            "sources": self.sources,
            "passage_count": self.passages.len(),
            "relevant": self.relevant,
            "passages": self.passages,
        })
    }

    /// Formatted block for the planning context, only when relevant
    pub fn context_block(&self, template: &str) -> Option<String> {
        if !self.relevant || self.passages.is_empty() {
            return None;
        }
        let passages = self
            .passages
            .iter()
            .map(|p| format!("[{}] {}", p.source, p.content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        Some(render(template, &[("passages", &passages)]))
    }

    pub fn metadata(&self) -> RetrievalMetadata {
        RetrievalMetadata {
            sources: self.sources.clone(),
            rephrased_query: self.rephrased_query.clone(),
            passage_count: self.passages.len(),
            relevant: self.relevant,
        }
    }
}

/// Artifact plus what the model calls cost
#[derive(Debug, Clone)]
pub struct RetrievalRun {
    pub artifact: RetrievalArtifact,
    /// Formatted context block (resolved against the thread's prompts)
    pub context_block: Option<String>,
    pub usage: TokenUsage,
}

pub struct RetrievalPipeline {
    provider: Arc<dyn LLMProvider>,
    lookup: Arc<dyn PassageLookup>,
    prompts: Arc<PromptStore>,
    catalog: Arc<Catalog>,
    config: RetrievalConfig,
    call_timeout: Duration,
}

impl RetrievalPipeline {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        lookup: Arc<dyn PassageLookup>,
        prompts: Arc<PromptStore>,
        catalog: Arc<Catalog>,
        config: RetrievalConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            lookup,
            prompts,
            catalog,
            config,
            call_timeout,
        }
    }

    fn prompt(&self, name: &str, thread: &Thread) -> Result<String, EngineError> {
        self.prompts.resolve(name, Some(&thread.id))
    }

    /// Run all four stages for `question`
    pub async fn run(&self, thread: &Thread, question: &str) -> RetrievalRun {
        let mut usage = TokenUsage::default();

        // Stage 1: rephrase
        let prior = stages::prior_messages(thread);
        let (query, rephrased) = if prior <= self.config.rephrase_min_history {
            debug!(prior, "Short history, skipping rephrase");
            (question.to_string(), false)
        } else {
            match self.prompt(PROMPT_REPHRASE, thread) {
                Ok(template) => {
                    let (result, cost) = stages::rephrase(
                        self.provider.as_ref(),
                        &self.catalog,
                        &template,
                        thread,
                        question,
                        self.call_timeout,
                    )
                    .await;
                    usage.add(cost);
                    match result {
                        Ok(text) => (text, true),
                        Err(e) => {
                            warn!(error = %e, "Rephrase failed, using original question");
                            (question.to_string(), false)
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Rephrase prompt unavailable, using original question");
                    (question.to_string(), false)
                }
            }
        };

        // Stage 2: select and retrieve
        let sources = select::select_sources(
            &query,
            &self.config.sources,
            &thread.settings.embedding_model,
            self.config.max_sources,
        );
        let passages = if sources.is_empty() {
            debug!(embedding_model = %thread.settings.embedding_model, "No compatible sources");
            Vec::new()
        } else {
            match self.lookup.search(&query, &sources, self.config.top_k).await {
                Ok(passages) => passages,
                Err(e) => {
                    warn!(error = %e, sources = ?sources, "Passage lookup failed, continuing without passages");
                    Vec::new()
                }
            }
        };

        // Stage 3: grade
        let relevant = if passages.is_empty() {
            false
        } else {
            match self.prompt(PROMPT_GRADE, thread) {
                Ok(template) => {
                    let (result, cost) = stages::grade(
                        self.provider.as_ref(),
                        &self.catalog,
                        &template,
                        &query,
                        &passages,
                        self.call_timeout,
                    )
                    .await;
                    usage.add(cost);
                    result.unwrap_or_else(|e| {
                        warn!(error = %e, "Grading failed, treating passages as relevant");
                        true
                    })
                }
                Err(e) => {
                    warn!(error = %e, "Grade prompt unavailable, treating passages as relevant");
                    true
                }
            }
        };

        let artifact = RetrievalArtifact {
            original_question: question.to_string(),
            rephrased_query: query,
            rephrased,
            sources,
            passages,
            relevant,
        };

        // Stage 4: format
        let context_block = match self.prompt(PROMPT_CONTEXT_BLOCK, thread) {
            Ok(template) => artifact.context_block(&template),
            Err(e) => {
                warn!(error = %e, "Context block prompt unavailable");
                None
            }
        };

        info!(
            sources = ?artifact.sources,
            passages = artifact.passages.len(),
            relevant = artifact.relevant,
            rephrased = artifact.rephrased,
            "Retrieval finished"
        );

        RetrievalRun {
            artifact,
            context_block,
            usage,
        }
    }
}
