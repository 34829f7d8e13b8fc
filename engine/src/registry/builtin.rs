//! Built-in `core` module
//!
//! Registers the retrieval tool offered to the model, the two hidden helper
//! tools the retrieval pipeline calls the model with, and the engine's own
//! prompts.

use sdk::errors::EngineError;
use sdk::registrar::{AuthContext, ExtensionModule, PromptTemplate, Registrar};
use sdk::tool::ToolDescriptor;
use serde_json::json;

pub const CORE_MODULE: &str = "core";

/// Model-visible retrieval tool
pub const SEARCH_TOOL: &str = "search_documents";
/// Hidden grading helper
pub const GRADE_TOOL: &str = "grade_documents";
/// Hidden rephrasing helper
pub const REPHRASE_TOOL: &str = "rephrase_question";

pub const PROMPT_SYSTEM: &str = "system";
pub const PROMPT_REPHRASE: &str = "rephrase";
pub const PROMPT_GRADE: &str = "grade";
pub const PROMPT_CONTEXT_BLOCK: &str = "context_block";
pub const PROMPT_TOOL_FAILURE: &str = "tool_failure";

const SYSTEM_PROMPT: &str = "You are a helpful assistant. When a question needs facts from \
the knowledge base, call the search_documents tool with the user's question. When you use \
retrieved context, cite the source names you relied on in square brackets, e.g. [DOCS]. \
If you do not know the answer, say so.";

const REPHRASE_PROMPT: &str = "Given the conversation below and a follow-up question, rewrite \
the follow-up question as a standalone question that can be understood without the \
conversation. Keep the original language. Call rephrase_question with the result.

Conversation:
{history}

Follow-up question: {question}";

const GRADE_PROMPT: &str = "You are grading whether retrieved documents are relevant to a \
question. If any document contains keywords or meaning related to the question, grade it as \
relevant. Call grade_documents with binary_score 'yes' or 'no'.

Question: {question}

Documents:
{documents}";

const CONTEXT_BLOCK_PROMPT: &str = "Use the following retrieved context to answer the user's \
latest question. Cite the source name in brackets for every fact you take from it.

{passages}";

const TOOL_FAILURE_PROMPT: &str = "Sorry, something went wrong while handling your request. \
If this keeps happening, contact support and mention reference {reference}.";

/// The engine's own extension module
#[derive(Debug, Default)]
pub struct CoreModule;

impl CoreModule {
    pub fn new() -> Self {
        Self
    }
}

impl ExtensionModule for CoreModule {
    fn name(&self) -> &str {
        CORE_MODULE
    }

    fn register(&self, registrar: &mut dyn Registrar, _auth: &AuthContext) -> Result<(), EngineError> {
        registrar.register_tool(
            ToolDescriptor::internal(
                SEARCH_TOOL,
                "Search the knowledge base for passages that help answer the user's question.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The question to search for"
                        }
                    },
                    "required": ["query"]
                }),
            ),
            None,
        )?;

        registrar.register_tool(
            ToolDescriptor::internal(
                GRADE_TOOL,
                "Binary relevance score for retrieved documents.",
                json!({
                    "type": "object",
                    "properties": {
                        "binary_score": {
                            "type": "string",
                            "enum": ["yes", "no"],
                            "description": "'yes' if the documents are relevant to the question"
                        }
                    },
                    "required": ["binary_score"]
                }),
            )
            .hidden(),
            None,
        )?;

        registrar.register_tool(
            ToolDescriptor::internal(
                REPHRASE_TOOL,
                "A standalone rewrite of the user's follow-up question.",
                json!({
                    "type": "object",
                    "properties": {
                        "question": {
                            "type": "string",
                            "description": "The standalone question"
                        }
                    },
                    "required": ["question"]
                }),
            )
            .hidden(),
            None,
        )?;

        for (name, text) in [
            (PROMPT_SYSTEM, SYSTEM_PROMPT),
            (PROMPT_REPHRASE, REPHRASE_PROMPT),
            (PROMPT_GRADE, GRADE_PROMPT),
            (PROMPT_CONTEXT_BLOCK, CONTEXT_BLOCK_PROMPT),
            (PROMPT_TOOL_FAILURE, TOOL_FAILURE_PROMPT),
        ] {
            registrar.register_prompt(PromptTemplate::new(name, text))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryBuilder;
    use sdk::tool::ToolCategory;

    #[test]
    fn test_core_registers_without_scopes() {
        let auth = AuthContext::new("test", Vec::<String>::new());
        let mut builder = RegistryBuilder::new(auth.clone());
        builder.begin_module(CORE_MODULE);
        CoreModule::new().register(&mut builder, &auth).unwrap();
        let catalog = builder.freeze().unwrap();

        assert_eq!(catalog.retrieval_tool(), Some(SEARCH_TOOL));
        let grade = catalog.descriptor(GRADE_TOOL).unwrap();
        assert_eq!(grade.category, ToolCategory::InternalRetrieval);
        assert!(!grade.model_visible);
        assert!(!catalog.descriptor(REPHRASE_TOOL).unwrap().model_visible);

        for prompt in [
            PROMPT_SYSTEM,
            PROMPT_REPHRASE,
            PROMPT_GRADE,
            PROMPT_CONTEXT_BLOCK,
            PROMPT_TOOL_FAILURE,
        ] {
            assert!(catalog.prompt_default(prompt).is_some(), "missing {prompt}");
        }
    }

    #[test]
    fn test_prompt_placeholders() {
        assert!(REPHRASE_PROMPT.contains("{history}"));
        assert!(REPHRASE_PROMPT.contains("{question}"));
        assert!(GRADE_PROMPT.contains("{documents}"));
        assert!(CONTEXT_BLOCK_PROMPT.contains("{passages}"));
        assert!(TOOL_FAILURE_PROMPT.contains("{reference}"));
    }
}
