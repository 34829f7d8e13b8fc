//! Conversation threads
//!
//! A `Thread` is the persisted, unsanitized record of a conversation: every
//! user, assistant and tool-result message in order, including the
//! ephemeral retrieval audit records the planner never reads back.

use crate::agent::metadata::MessageMetadata;
use crate::config::ThreadDefaults;
use crate::llm::{Message, MessageRole, ToolCall};
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Visibility tag carried by tool-result messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    /// Retrieval pipeline output, kept for audit and never re-read by the planner
    EphemeralInternal,

    /// Output of any other tool, part of the model-visible history
    PersistentExternal,
}

impl Visibility {
    pub fn as_str(&self) -> &str {
        match self {
            Visibility::EphemeralInternal => "ephemeral-internal",
            Visibility::PersistentExternal => "persistent-external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ephemeral-internal" => Some(Visibility::EphemeralInternal),
            "persistent-external" => Some(Visibility::PersistentExternal),
            _ => None,
        }
    }
}

/// One persisted message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Only set on tool-result messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    pub created_at: i64,
}

impl ThreadMessage {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            visibility: None,
            metadata: None,
            created_at: now_secs(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            visibility: Some(visibility),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }

    /// Attach side-channel metadata
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_ephemeral(&self) -> bool {
        self.visibility == Some(Visibility::EphemeralInternal)
    }

    /// Model-facing form of this message
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
            tool_call_id: self.tool_call_id.clone(),
        }
    }
}

/// Settings snapshot deciding which tool categories a thread may use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSettings {
    pub retrieval_enabled: bool,
    pub external_tools_enabled: bool,
    /// Overrides the configured recursion limit for this thread
    #[serde(default)]
    pub recursion_limit: Option<usize>,
    pub embedding_model: String,
}

impl From<&ThreadDefaults> for ThreadSettings {
    fn from(defaults: &ThreadDefaults) -> Self {
        Self {
            retrieval_enabled: defaults.retrieval_enabled,
            external_tools_enabled: defaults.external_tools_enabled,
            recursion_limit: None,
            embedding_model: defaults.embedding_model.clone(),
        }
    }
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self::from(&ThreadDefaults::default())
    }
}

/// A long-lived conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub messages: Vec<ThreadMessage>,
    pub settings: ThreadSettings,
    pub created_at: i64,
}

impl Thread {
    pub fn new(id: impl Into<String>, settings: ThreadSettings) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            settings,
            created_at: now_secs(),
        }
    }

    pub fn push(&mut self, message: ThreadMessage) {
        self.messages.push(message);
    }

    /// Invocation ids from the most recent assistant message that have no
    /// tool-result yet. Empty means the pairing invariant holds.
    pub fn pending_tool_calls(&self) -> Vec<String> {
        let Some(pos) = self
            .messages
            .iter()
            .rposition(|m| m.role == MessageRole::Assistant)
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[pos + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.messages[pos]
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .map(|call| call.id.clone())
            .collect()
    }

    /// Content of the latest user message
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// Number of ephemeral audit records
    pub fn ephemeral_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_ephemeral()).count()
    }
}

/// Summary row for thread listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    pub message_count: usize,
    pub created_at: i64,
}

/// Persistence collaborator holding full, unsanitized threads
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Load an existing thread or create an empty one with the given settings
    async fn load_or_create(
        &self,
        id: &str,
        settings: &ThreadSettings,
    ) -> Result<Thread, EngineError>;

    /// Load a thread if it exists
    async fn load(&self, id: &str) -> Result<Option<Thread>, EngineError>;

    /// Persist the thread's settings and any messages not yet stored
    async fn save(&self, thread: &Thread) -> Result<(), EngineError>;

    /// List known threads
    async fn list(&self) -> Result<Vec<ThreadSummary>, EngineError>;
}

/// Process-local thread store
#[derive(Default, Clone)]
pub struct InMemoryThreadStore {
    threads: Arc<RwLock<HashMap<String, Thread>>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn load_or_create(
        &self,
        id: &str,
        settings: &ThreadSettings,
    ) -> Result<Thread, EngineError> {
        let mut threads = self.threads.write().await;
        Ok(threads
            .entry(id.to_string())
            .or_insert_with(|| Thread::new(id, settings.clone()))
            .clone())
    }

    async fn load(&self, id: &str) -> Result<Option<Thread>, EngineError> {
        Ok(self.threads.read().await.get(id).cloned())
    }

    async fn save(&self, thread: &Thread) -> Result<(), EngineError> {
        self.threads
            .write()
            .await
            .insert(thread.id.clone(), thread.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ThreadSummary>, EngineError> {
        let threads = self.threads.read().await;
        let mut summaries: Vec<ThreadSummary> = threads
            .values()
            .map(|t| ThreadSummary {
                id: t.id.clone(),
                message_count: t.messages.len(),
                created_at: t.created_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
