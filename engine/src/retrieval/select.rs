//! Source selection
//!
//! Sources are matched against the query by term overlap with their name and
//! description, after filtering out sources indexed with a different
//! embedding configuration than the thread uses.

use crate::config::SourceConfig;
use std::cmp::Ordering;
use std::collections::BTreeSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "me", "my", "of", "on", "or", "the", "this", "to", "was", "what",
    "when", "where", "which", "who", "why", "with", "you", "your",
];

/// Lowercased content terms of `text`
pub fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Number of query terms present in `text`
pub fn overlap(query_terms: &BTreeSet<String>, text: &str) -> usize {
    terms(text).intersection(query_terms).count()
}

/// Pick up to `max_sources` source names for `query`
///
/// Highest overlap first, ties by name ascending. Sources with zero overlap
/// are only used when no compatible source overlaps at all, in which case
/// every compatible source is a candidate in name order.
pub fn select_sources(
    query: &str,
    sources: &[SourceConfig],
    embedding_model: &str,
    max_sources: usize,
) -> Vec<String> {
    let query_terms = terms(query);

    let mut scored: Vec<(usize, &SourceConfig)> = sources
        .iter()
        .filter(|s| s.embedding_model == embedding_model)
        .map(|s| {
            let text = format!("{} {}", s.name, s.description);
            (overlap(&query_terms, &text), s)
        })
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| match sb.cmp(sa) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });

    let any_match = scored.first().is_some_and(|(score, _)| *score > 0);

    scored
        .into_iter()
        .filter(|(score, _)| !any_match || *score > 0)
        .take(max_sources)
        .map(|(_, s)| s.name.clone())
        .collect()
}
