/// Thread persistence
///
/// Stores every message of a thread exactly as the state machine appended
/// it. This is the history reader's view: nothing is sanitized here.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sqlx::{Row, SqlitePool};

use crate::agent::metadata::MessageMetadata;
use crate::llm::{MessageRole, ToolCall};
use crate::thread::{now_secs, Thread, ThreadMessage, ThreadSettings, ThreadStore, ThreadSummary, Visibility};

/// Thread repository for database operations
#[derive(Clone)]
pub struct ThreadRepository {
    pool: SqlitePool,
}

fn parse_role(role: &str) -> Result<MessageRole> {
    match role {
        "system" => Ok(MessageRole::System),
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        "tool" => Ok(MessageRole::Tool),
        other => Err(anyhow!("Unknown message role '{}'", other)),
    }
}

impl ThreadRepository {
    /// Create a new thread repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load a thread with all its messages
    pub async fn get_thread(&self, id: &str) -> Result<Option<Thread>> {
        let row = sqlx::query("SELECT id, settings, created_at FROM threads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch thread")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let settings: ThreadSettings = serde_json::from_str(row.get::<&str, _>("settings"))
            .context("Failed to decode thread settings")?;

        let messages = self.get_messages(id).await?;

        Ok(Some(Thread {
            id: row.get("id"),
            messages,
            settings,
            created_at: row.get("created_at"),
        }))
    }

    /// All messages of a thread in order
    pub async fn get_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, role, content, tool_calls, tool_call_id, visibility, metadata, created_at
            FROM messages
            WHERE thread_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch messages")?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let tool_calls: Vec<ToolCall> = match row.get::<Option<String>, _>("tool_calls") {
                Some(raw) => serde_json::from_str(&raw).context("Failed to decode tool calls")?,
                None => Vec::new(),
            };
            let metadata: Option<MessageMetadata> = match row.get::<Option<String>, _>("metadata") {
                Some(raw) => Some(serde_json::from_str(&raw).context("Failed to decode metadata")?),
                None => None,
            };
            let visibility = row
                .get::<Option<String>, _>("visibility")
                .and_then(|v| Visibility::parse(&v));

            messages.push(ThreadMessage {
                id: row.get("id"),
                role: parse_role(row.get::<&str, _>("role"))?,
                content: row.get("content"),
                tool_calls,
                tool_call_id: row.get("tool_call_id"),
                visibility,
                metadata,
                created_at: row.get("created_at"),
            });
        }

        Ok(messages)
    }

    /// Upsert the thread row and insert messages not yet stored
    ///
    /// Messages are append-only; a message already stored under its id is
    /// left untouched.
    pub async fn save_thread(&self, thread: &Thread) -> Result<()> {
        let settings =
            serde_json::to_string(&thread.settings).context("Failed to encode thread settings")?;
        let now = now_secs();

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO threads (id, settings, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET settings = excluded.settings, updated_at = excluded.updated_at
            "#,
        )
        .bind(&thread.id)
        .bind(&settings)
        .bind(thread.created_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert thread")?;

        for (seq, message) in thread.messages.iter().enumerate() {
            let tool_calls = if message.tool_calls.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&message.tool_calls).context("Failed to encode tool calls")?)
            };
            let metadata = message
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .context("Failed to encode metadata")?;

            sqlx::query(
                r#"
                INSERT OR IGNORE INTO messages
                    (id, thread_id, seq, role, content, tool_calls, tool_call_id, visibility, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&message.id)
            .bind(&thread.id)
            .bind(seq as i64)
            .bind(message.role.to_string())
            .bind(&message.content)
            .bind(tool_calls)
            .bind(&message.tool_call_id)
            .bind(message.visibility.map(|v| v.as_str().to_string()))
            .bind(metadata)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert message")?;
        }

        tx.commit().await.context("Failed to commit thread")?;
        Ok(())
    }

    /// Threads ordered by most recent update
    pub async fn list_threads(&self) -> Result<Vec<ThreadSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.created_at, COUNT(m.id) AS message_count
            FROM threads t
            LEFT JOIN messages m ON m.thread_id = t.id
            GROUP BY t.id
            ORDER BY t.updated_at DESC, t.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list threads")?;

        Ok(rows
            .into_iter()
            .map(|row| ThreadSummary {
                id: row.get("id"),
                message_count: row.get::<i64, _>("message_count") as usize,
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

fn storage_error(err: anyhow::Error) -> EngineError {
    EngineError::Database(format!("{:#}", err))
}

#[async_trait]
impl ThreadStore for ThreadRepository {
    async fn load_or_create(
        &self,
        id: &str,
        settings: &ThreadSettings,
    ) -> Result<Thread, EngineError> {
        match self.get_thread(id).await.map_err(storage_error)? {
            Some(thread) => Ok(thread),
            None => {
                let thread = Thread::new(id, settings.clone());
                self.save_thread(&thread).await.map_err(storage_error)?;
                Ok(thread)
            }
        }
    }

    async fn load(&self, id: &str) -> Result<Option<Thread>, EngineError> {
        self.get_thread(id).await.map_err(storage_error)
    }

    async fn save(&self, thread: &Thread) -> Result<(), EngineError> {
        self.save_thread(thread).await.map_err(storage_error)
    }

    async fn list(&self) -> Result<Vec<ThreadSummary>, EngineError> {
        self.list_threads().await.map_err(storage_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::llm::TokenUsage;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        (temp_dir, db)
    }

    #[tokio::test]
    async fn test_round_trip_keeps_ephemeral_records() {
        let (_dir, db) = setup().await;
        let repo = db.threads();

        let mut thread = repo
            .load_or_create("t1", &ThreadSettings::default())
            .await
            .unwrap();
        thread.push(ThreadMessage::user("What's the default port?"));
        thread.push(ThreadMessage::assistant_with_tools(
            "",
            vec![ToolCall::new("c1", "search_documents", r#"{"query":"default port"}"#)],
        ));
        thread.push(ThreadMessage::tool_result(
            "c1",
            r#"{"passage_count":1}"#,
            Visibility::EphemeralInternal,
        ));
        let metadata = MessageMetadata {
            turn_id: "turn".to_string(),
            usage: TokenUsage::new(10, 2),
            retrieval: None,
            support_reference: None,
        };
        thread.push(ThreadMessage::assistant("8080 [DOCS]").with_metadata(metadata.clone()));

        repo.save(&thread).await.unwrap();
        // saving twice does not duplicate
        repo.save(&thread).await.unwrap();

        let loaded = repo.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 4);
        assert_eq!(loaded.messages, thread.messages);
        assert_eq!(loaded.ephemeral_count(), 1);
        assert_eq!(loaded.messages[3].metadata, Some(metadata));
    }

    #[tokio::test]
    async fn test_settings_update_and_list() {
        let (_dir, db) = setup().await;
        let repo = db.threads();

        let mut thread = repo
            .load_or_create("t1", &ThreadSettings::default())
            .await
            .unwrap();
        thread.settings.retrieval_enabled = false;
        thread.settings.recursion_limit = Some(5);
        thread.push(ThreadMessage::user("hi"));
        repo.save(&thread).await.unwrap();

        let loaded = repo.load("t1").await.unwrap().unwrap();
        assert!(!loaded.settings.retrieval_enabled);
        assert_eq!(loaded.settings.recursion_limit, Some(5));

        let list = repo.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].message_count, 1);
        assert!(repo.load("missing").await.unwrap().is_none());
    }
}
