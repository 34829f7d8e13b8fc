//! Tool and prompt registry
//!
//! Extension modules register into a `RegistryBuilder` at startup. Every
//! descriptor is validated on the way in and every name must resolve to
//! exactly one registrant. Once discovery completes the builder is frozen
//! into an immutable `Catalog` that is shared read-only by all threads.

pub mod builtin;
pub mod discovery;

use crate::proxy::ProxyHandler;
use crate::thread::ThreadSettings;
use regex::Regex;
use sdk::errors::EngineError;
use sdk::registrar::{
    AuthContext, PromptTemplate, ProxyEndpoint, Registrar, SCOPE_EXTERNAL_TOOLS,
    SCOPE_PROXY_SPAWN,
};
use sdk::tool::{ToolCategory, ToolDescriptor, ToolHandler, THREAD_ID_PARAM};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

pub use discovery::{auth_from_config, discover, modules_from_config};

const MAX_NAME_LEN: usize = 64;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!("^[A-Za-z0-9_-]{{1,{}}}$", MAX_NAME_LEN))
            .expect("Invalid tool name pattern")
    })
}

/// A registered tool
#[derive(Clone)]
pub struct ToolEntry {
    pub descriptor: ToolDescriptor,
    pub handler: Option<Arc<dyn ToolHandler>>,
    /// Module that registered the tool
    pub module: String,
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("descriptor", &self.descriptor)
            .field("has_handler", &self.handler.is_some())
            .field("module", &self.module)
            .finish()
    }
}

/// A registered prompt template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEntry {
    pub template: PromptTemplate,
    pub module: String,
}

/// Mutable registry used during discovery
pub struct RegistryBuilder {
    auth: AuthContext,
    current_module: String,
    tools: BTreeMap<String, ToolEntry>,
    prompts: BTreeMap<String, PromptEntry>,
}

impl RegistryBuilder {
    pub fn new(auth: AuthContext) -> Self {
        Self {
            auth,
            current_module: String::new(),
            tools: BTreeMap::new(),
            prompts: BTreeMap::new(),
        }
    }

    /// Attribute subsequent registrations to `module`
    pub(crate) fn begin_module(&mut self, module: &str) {
        self.current_module = module.to_string();
    }

    /// Freeze the registry, running catalog-wide checks
    pub fn freeze(self) -> Result<Catalog, EngineError> {
        let visible_retrieval: Vec<&ToolEntry> = self
            .tools
            .values()
            .filter(|e| {
                e.descriptor.category == ToolCategory::InternalRetrieval
                    && e.descriptor.model_visible
            })
            .collect();

        if visible_retrieval.len() > 1 {
            return Err(EngineError::MalformedDescriptor {
                name: visible_retrieval[1].descriptor.name.clone(),
                reason: format!(
                    "second model-visible retrieval tool (already provided by '{}')",
                    visible_retrieval[0].module
                ),
            });
        }
        let retrieval_tool = visible_retrieval
            .first()
            .map(|e| e.descriptor.name.clone());

        Ok(Catalog {
            tools: self.tools,
            prompts: self.prompts,
            retrieval_tool,
        })
    }

    fn insert_tool(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Option<Arc<dyn ToolHandler>>,
    ) -> Result<(), EngineError> {
        if let Some(existing) = self.tools.get(&descriptor.name) {
            return Err(EngineError::NameCollision {
                name: descriptor.name,
                first: existing.module.clone(),
                second: self.current_module.clone(),
            });
        }

        tracing::debug!(
            tool = %descriptor.name,
            module = %self.current_module,
            category = %descriptor.category,
            visible = descriptor.model_visible,
            "Registered tool"
        );

        self.tools.insert(
            descriptor.name.clone(),
            ToolEntry {
                descriptor,
                handler,
                module: self.current_module.clone(),
            },
        );
        Ok(())
    }
}

/// Check a descriptor in isolation
pub fn validate_descriptor(
    descriptor: &ToolDescriptor,
    has_handler: bool,
) -> Result<(), EngineError> {
    let malformed = |reason: &str| EngineError::MalformedDescriptor {
        name: descriptor.name.clone(),
        reason: reason.to_string(),
    };

    if !name_pattern().is_match(&descriptor.name) {
        return Err(malformed(
            "name must be 1-64 characters of letters, digits, '_' or '-'",
        ));
    }
    if descriptor.description.trim().is_empty() {
        return Err(malformed("description is empty"));
    }

    let schema = descriptor
        .input_schema
        .as_object()
        .ok_or_else(|| malformed("input schema is not a JSON object"))?;
    if schema.get("type").and_then(|t| t.as_str()) != Some("object") {
        return Err(malformed("input schema must have \"type\": \"object\""));
    }

    match (descriptor.category, has_handler) {
        (ToolCategory::External, false) => {
            return Err(malformed("external tool registered without a handler"))
        }
        (ToolCategory::InternalRetrieval, true) => {
            return Err(malformed(
                "internal-retrieval tool must not carry a handler",
            ))
        }
        _ => {}
    }

    if descriptor.is_thread_scoped() {
        let declares_thread_id = schema
            .get("properties")
            .and_then(|p| p.as_object())
            .is_some_and(|p| p.contains_key(THREAD_ID_PARAM));
        if declares_thread_id {
            return Err(malformed(
                "thread-scoped tool must not declare the injected thread_id parameter",
            ));
        }
    }

    Ok(())
}

impl Registrar for RegistryBuilder {
    fn register_tool(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Option<Arc<dyn ToolHandler>>,
    ) -> Result<(), EngineError> {
        validate_descriptor(&descriptor, handler.is_some())?;
        if descriptor.category == ToolCategory::External {
            self.auth
                .require(&self.current_module, SCOPE_EXTERNAL_TOOLS)?;
        }
        self.insert_tool(descriptor, handler)
    }

    fn register_prompt(&mut self, template: PromptTemplate) -> Result<(), EngineError> {
        if !name_pattern().is_match(&template.name) {
            return Err(EngineError::MalformedDescriptor {
                name: template.name,
                reason: "invalid prompt name".to_string(),
            });
        }
        if template.default_text.trim().is_empty() {
            return Err(EngineError::MalformedDescriptor {
                name: template.name,
                reason: "prompt default text is empty".to_string(),
            });
        }
        if let Some(existing) = self.prompts.get(&template.name) {
            return Err(EngineError::NameCollision {
                name: template.name,
                first: existing.module.clone(),
                second: self.current_module.clone(),
            });
        }

        self.prompts.insert(
            template.name.clone(),
            PromptEntry {
                template,
                module: self.current_module.clone(),
            },
        );
        Ok(())
    }

    fn register_proxy(&mut self, endpoint: ProxyEndpoint) -> Result<(), EngineError> {
        self.auth.require(&self.current_module, SCOPE_PROXY_SPAWN)?;

        if endpoint.command.trim().is_empty() {
            return Err(EngineError::MalformedDescriptor {
                name: endpoint.name,
                reason: "proxy command is empty".to_string(),
            });
        }
        if endpoint.tools.is_empty() {
            return Err(EngineError::MalformedDescriptor {
                name: endpoint.name,
                reason: "proxy serves no tools".to_string(),
            });
        }

        let endpoint = Arc::new(endpoint);
        for descriptor in &endpoint.tools {
            if descriptor.category != ToolCategory::External {
                return Err(EngineError::MalformedDescriptor {
                    name: descriptor.name.clone(),
                    reason: "proxy tools must be external".to_string(),
                });
            }
            let handler: Arc<dyn ToolHandler> =
                Arc::new(ProxyHandler::new(endpoint.clone(), &descriptor.name));
            self.register_tool(descriptor.clone(), Some(handler))?;
        }
        Ok(())
    }
}

/// Frozen, read-only tool and prompt catalog
#[derive(Debug)]
pub struct Catalog {
    tools: BTreeMap<String, ToolEntry>,
    prompts: BTreeMap<String, PromptEntry>,
    retrieval_tool: Option<String>,
}

impl Catalog {
    pub fn tool(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.get(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|e| &e.descriptor)
    }

    /// All tools in name order
    pub fn tools(&self) -> impl Iterator<Item = &ToolEntry> {
        self.tools.values()
    }

    /// Name of the model-visible retrieval tool, if any module registered one
    pub fn retrieval_tool(&self) -> Option<&str> {
        self.retrieval_tool.as_deref()
    }

    /// Whether a thread with these settings may invoke the tool
    pub fn is_enabled(&self, descriptor: &ToolDescriptor, settings: &ThreadSettings) -> bool {
        match descriptor.category {
            ToolCategory::InternalRetrieval => settings.retrieval_enabled,
            ToolCategory::External => settings.external_tools_enabled,
        }
    }

    /// Model-visible tools enabled for the thread, in name order
    pub fn visible_tools(&self, settings: &ThreadSettings) -> Vec<&ToolDescriptor> {
        self.tools
            .values()
            .map(|e| &e.descriptor)
            .filter(|d| d.model_visible && self.is_enabled(d, settings))
            .collect()
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptEntry> {
        self.prompts.get(name)
    }

    pub fn prompt_default(&self, name: &str) -> Option<&str> {
        self.prompts
            .get(name)
            .map(|e| e.template.default_text.as_str())
    }

    /// All prompts in name order
    pub fn prompts(&self) -> impl Iterator<Item = &PromptEntry> {
        self.prompts.values()
    }
}
