//! Session Notes Extension
//!
//! Lets the model keep short notes scoped to the current conversation. Both
//! tools carry the reserved `thread_` prefix, so the engine injects the
//! calling thread id and the model's schema never mentions it.
//!
//! Tools provided:
//! - thread_note_save: Store a note for this thread
//! - thread_note_list: List the notes stored for this thread

use async_trait::async_trait;
use sdk::{
    AuthContext, EngineError, ExtensionModule, Registrar, ThreadContext, ToolArgs,
    ToolDescriptor, ToolHandler, ToolOutput, THREAD_ID_PARAM,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const MODULE_NAME: &str = "session-notes";

pub const SAVE_TOOL: &str = "thread_note_save";
pub const LIST_TOOL: &str = "thread_note_list";

/// Longest note accepted, in characters
const MAX_NOTE_CHARS: usize = 2000;

/// Notes per thread id
#[derive(Debug, Default)]
pub struct NoteBook {
    notes: Mutex<HashMap<String, Vec<String>>>,
}

impl NoteBook {
    fn save(&self, thread_id: &str, note: String) -> usize {
        let mut notes = self.notes.lock().expect("NoteBook lock poisoned");
        let entry = notes.entry(thread_id.to_string()).or_default();
        entry.push(note);
        entry.len()
    }

    fn list(&self, thread_id: &str) -> Vec<String> {
        let notes = self.notes.lock().expect("NoteBook lock poisoned");
        notes.get(thread_id).cloned().unwrap_or_default()
    }
}

/// The `thread_id` injected by the engine
fn injected_thread_id(args: &ToolArgs) -> Result<String, EngineError> {
    Ok(args.param_str(THREAD_ID_PARAM)?)
}

struct SaveNote {
    book: Arc<NoteBook>,
}

#[async_trait]
impl ToolHandler for SaveNote {
    async fn handle(&self, args: ToolArgs, _ctx: &ThreadContext) -> Result<ToolOutput, EngineError> {
        let thread_id = injected_thread_id(&args)?;
        let note = args.param_str("note")?;
        let note = note.trim();
        if note.is_empty() {
            return Err(EngineError::InvalidArguments("note is empty".to_string()));
        }
        if note.chars().count() > MAX_NOTE_CHARS {
            return Err(EngineError::InvalidArguments(format!(
                "note exceeds {} characters",
                MAX_NOTE_CHARS
            )));
        }

        let count = self.book.save(&thread_id, note.to_string());
        tracing::debug!(thread_id = %thread_id, count, "Saved session note");

        Ok(ToolOutput::json(json!({ "saved": true, "note_count": count })))
    }
}

struct ListNotes {
    book: Arc<NoteBook>,
}

#[async_trait]
impl ToolHandler for ListNotes {
    async fn handle(&self, args: ToolArgs, _ctx: &ThreadContext) -> Result<ToolOutput, EngineError> {
        let thread_id = injected_thread_id(&args)?;
        let notes = self.book.list(&thread_id);
        Ok(ToolOutput::json(json!({ "count": notes.len(), "notes": notes })))
    }
}

/// Extension module registering the session note tools
#[derive(Debug, Default)]
pub struct SessionNotesModule {
    book: Arc<NoteBook>,
}

impl SessionNotesModule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtensionModule for SessionNotesModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn register(&self, registrar: &mut dyn Registrar, _auth: &AuthContext) -> Result<(), EngineError> {
        registrar.register_tool(
            ToolDescriptor::external(
                SAVE_TOOL,
                "Save a short note about this conversation for later in the same conversation.",
                json!({
                    "type": "object",
                    "properties": {
                        "note": { "type": "string", "description": "The note to remember" }
                    },
                    "required": ["note"]
                }),
            ),
            Some(Arc::new(SaveNote {
                book: self.book.clone(),
            })),
        )?;

        registrar.register_tool(
            ToolDescriptor::external(
                LIST_TOOL,
                "List the notes saved earlier in this conversation.",
                json!({ "type": "object", "properties": {} }),
            ),
            Some(Arc::new(ListNotes {
                book: self.book.clone(),
            })),
        )?;

        Ok(())
    }
}
