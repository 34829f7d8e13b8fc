//! Prompt Override Store
//!
//! Resolves a prompt name to its active text. Precedence is
//! thread override > global override > registered default.
//!
//! Overrides live in an immutable `Overrides` snapshot behind
//! `RwLock<Arc<_>>`. Writers clone the current snapshot, modify the clone and
//! swap it in; readers clone the `Arc` and read without holding the lock, so
//! a reader sees either the old or the new map, never a partial update.

use crate::registry::Catalog;
use sdk::errors::EngineError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// One immutable generation of overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Overrides {
    pub global: BTreeMap<String, String>,
    pub threads: BTreeMap<String, BTreeMap<String, String>>,
}

/// Hot-swappable prompt text on top of the catalog defaults
pub struct PromptStore {
    catalog: Arc<Catalog>,
    overrides: RwLock<Arc<Overrides>>,
}

impl PromptStore {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            overrides: RwLock::new(Arc::new(Overrides::default())),
        }
    }

    /// Current snapshot (for display and for consistent multi-prompt reads)
    pub fn snapshot(&self) -> Arc<Overrides> {
        self.overrides
            .read()
            .expect("PromptStore lock poisoned")
            .clone()
    }

    /// Active text for `name`, optionally as seen by `thread`
    pub fn resolve(&self, name: &str, thread: Option<&str>) -> Result<String, EngineError> {
        let default = self
            .catalog
            .prompt_default(name)
            .ok_or_else(|| EngineError::UnknownPrompt(name.to_string()))?;

        let snapshot = self.snapshot();
        let thread_text = thread
            .and_then(|id| snapshot.threads.get(id))
            .and_then(|prompts| prompts.get(name));

        Ok(thread_text
            .or_else(|| snapshot.global.get(name))
            .map(String::as_str)
            .unwrap_or(default)
            .to_string())
    }

    pub fn set_override(&self, name: &str, text: impl Into<String>) -> Result<(), EngineError> {
        self.ensure_known(name)?;
        let text = text.into();
        self.update(|o| {
            o.global.insert(name.to_string(), text);
        });
        info!(prompt = %name, "Global prompt override set");
        Ok(())
    }

    pub fn clear_override(&self, name: &str) -> Result<(), EngineError> {
        self.ensure_known(name)?;
        self.update(|o| {
            o.global.remove(name);
        });
        info!(prompt = %name, "Global prompt override cleared");
        Ok(())
    }

    pub fn set_thread_override(
        &self,
        thread: &str,
        name: &str,
        text: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.ensure_known(name)?;
        let text = text.into();
        self.update(|o| {
            o.threads
                .entry(thread.to_string())
                .or_default()
                .insert(name.to_string(), text);
        });
        info!(prompt = %name, thread_id = %thread, "Thread prompt override set");
        Ok(())
    }

    pub fn clear_thread_override(&self, thread: &str, name: &str) -> Result<(), EngineError> {
        self.ensure_known(name)?;
        self.update(|o| {
            if let Some(prompts) = o.threads.get_mut(thread) {
                prompts.remove(name);
                if prompts.is_empty() {
                    o.threads.remove(thread);
                }
            }
        });
        Ok(())
    }

    fn ensure_known(&self, name: &str) -> Result<(), EngineError> {
        match self.catalog.prompt(name) {
            Some(_) => Ok(()),
            None => Err(EngineError::UnknownPrompt(name.to_string())),
        }
    }

    /// Clone-modify-swap under the write lock
    fn update(&self, apply: impl FnOnce(&mut Overrides)) {
        let mut guard = self.overrides.write().expect("PromptStore lock poisoned");
        let mut next = Overrides::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
    }
}

/// Substitute `{name}` placeholders in a single pass
///
/// Substituted values are never rescanned, so text pulled from passages or
/// user input cannot inject further placeholders. Unknown placeholders are
/// left as written.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (close, *value))
        });

        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
