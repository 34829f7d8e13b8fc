//! In-process passage index ranked by term overlap
//!
//! Used by tests and when no database is configured.

use super::select::{overlap, terms};
use super::{Passage, PassageLookup};
use async_trait::async_trait;
use sdk::errors::EngineError;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryPassageIndex {
    passages: RwLock<BTreeMap<String, Vec<String>>>,
}

impl InMemoryPassageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a passage to a source
    pub fn add(&self, source: &str, content: impl Into<String>) {
        self.passages
            .write()
            .expect("InMemoryPassageIndex lock poisoned")
            .entry(source.to_string())
            .or_default()
            .push(content.into());
    }

    /// Builder-style variant of [`add`](Self::add)
    pub fn with_passage(self, source: &str, content: impl Into<String>) -> Self {
        self.add(source, content);
        self
    }
}

#[async_trait]
impl PassageLookup for InMemoryPassageIndex {
    async fn search(
        &self,
        query: &str,
        sources: &[String],
        top_k: usize,
    ) -> Result<Vec<Passage>, EngineError> {
        let query_terms = terms(query);
        let index = self
            .passages
            .read()
            .expect("InMemoryPassageIndex lock poisoned");

        let mut results = Vec::new();
        for source in sources {
            let Some(contents) = index.get(source) else {
                continue;
            };

            let mut scored: Vec<(usize, &String)> = contents
                .iter()
                .map(|c| (overlap(&query_terms, c), c))
                .filter(|(score, _)| *score > 0)
                .collect();
            // stable sort keeps insertion order among equal scores
            scored.sort_by(|a, b| b.0.cmp(&a.0));

            results.extend(scored.into_iter().take(top_k).map(|(score, content)| Passage {
                source: source.clone(),
                content: content.clone(),
                score: score as f64,
            }));
        }
        Ok(results)
    }
}
