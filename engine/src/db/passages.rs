//! Passage Repository
//!
//! Full-text passage index backing the retrieval pipeline. Passages are
//! grouped by source name and ranked with the FTS5 bm25 `rank` column.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sqlx::{Row, SqlitePool};

use crate::retrieval::select::terms;
use crate::retrieval::{Passage, PassageLookup};

/// Split text into passages at blank lines
pub fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                chunks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }

    chunks
}

/// Build an FTS5 match expression that ORs the quoted query terms
fn match_expression(query: &str) -> Option<String> {
    let quoted: Vec<String> = terms(query)
        .into_iter()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect();
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

/// Repository for the passage index
#[derive(Clone)]
pub struct PassageRepository {
    pool: SqlitePool,
}

impl PassageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Chunk `text` and add every chunk to `source`, returning the chunk count
    pub async fn ingest_text(&self, source: &str, text: &str) -> Result<usize> {
        let chunks = chunk_text(text);
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for chunk in &chunks {
            sqlx::query("INSERT INTO passages (source, content) VALUES (?, ?)")
                .bind(source)
                .bind(chunk)
                .execute(&mut *tx)
                .await
                .context("Failed to insert passage")?;
        }

        tx.commit().await.context("Failed to commit passages")?;
        Ok(chunks.len())
    }

    /// Number of passages per source
    pub async fn source_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT source, COUNT(*) AS n FROM passages GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count passages")?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("source"), row.get("n")))
            .collect())
    }

    /// Top passages in one source ordered by bm25 rank
    pub async fn search_source(&self, query: &str, source: &str, limit: i64) -> Result<Vec<Passage>> {
        let Some(expression) = match_expression(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT source, content, rank
            FROM passages
            WHERE passages MATCH ? AND source = ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&expression)
        .bind(source)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to execute FTS query on passages")?;

        Ok(rows
            .into_iter()
            .map(|row| Passage {
                source: row.get("source"),
                content: row.get("content"),
                // bm25 rank is lower-is-better
                score: -row.get::<f64, _>("rank"),
            })
            .collect())
    }
}

#[async_trait]
impl PassageLookup for PassageRepository {
    async fn search(
        &self,
        query: &str,
        sources: &[String],
        top_k: usize,
    ) -> Result<Vec<Passage>, EngineError> {
        let mut passages = Vec::new();
        for source in sources {
            let found = self
                .search_source(query, source, top_k as i64)
                .await
                .map_err(|e| EngineError::Database(format!("{:#}", e)))?;
            passages.extend(found);
        }
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    #[test]
    fn test_chunk_text() {
        let text = "First para\nline two\n\n\n  \nSecond para\n";
        assert_eq!(chunk_text(text), vec!["First para\nline two", "Second para"]);
        assert!(chunk_text("\n\n").is_empty());
    }

    #[test]
    fn test_match_expression_quotes_terms() {
        assert_eq!(
            match_expression("What's the default port?").unwrap(),
            "\"default\" OR \"port\""
        );
        assert!(match_expression("what is it?").is_none());
    }

    #[tokio::test]
    async fn test_ingest_and_search() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let repo = db.passages();

        let added = repo
            .ingest_text(
                "DOCS",
                "The default port is 8080.\n\nLogs are written to stderr.\n\nUse --port to change the port.",
            )
            .await
            .unwrap();
        assert_eq!(added, 3);
        repo.ingest_text("HR", "The default vacation allowance is 25 days.")
            .await
            .unwrap();

        let found = repo
            .search("default port", &["DOCS".to_string()], 2)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.source == "DOCS"));
        assert!(found.iter().any(|p| p.content.contains("8080")));

        let counts = repo.source_counts().await.unwrap();
        assert_eq!(counts, vec![("DOCS".to_string(), 3), ("HR".to_string(), 1)]);

        db.close().await.unwrap();
    }
}
