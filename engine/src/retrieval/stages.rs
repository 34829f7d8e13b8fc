//! Model-backed pipeline stages
//!
//! Both stages ask the model to answer through a hidden helper tool schema so
//! the reply is structured. They return errors freely; the pipeline decides
//! the fallback.

use super::Passage;
use crate::agent::context::is_internal_request;
use crate::llm::{LLMProvider, LLMResponse, Message, MessageRole, TokenUsage, ToolSchema};
use crate::prompts::render;
use crate::registry::builtin::{GRADE_TOOL, REPHRASE_TOOL};
use crate::registry::Catalog;
use crate::thread::Thread;
use sdk::errors::EngineError;
use sdk::types::ToolArgs;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Passage text sent to the grader is cut to this many characters each
const MAX_GRADE_PASSAGE_CHARS: usize = 1500;

/// Messages of `thread` preceding its latest user message that the planner
/// would read back: ephemeral audit records and the retrieval-only requests
/// they answer are not counted
pub fn prior_messages(thread: &Thread) -> usize {
    let end = thread
        .messages
        .iter()
        .rposition(|m| m.role == MessageRole::User)
        .unwrap_or(thread.messages.len());
    let head = &thread.messages[..end];
    (0..head.len())
        .filter(|&i| !head[i].is_ephemeral() && !is_internal_request(head, i))
        .count()
}

/// Plain-text transcript of the user/assistant exchange before the latest
/// user message
fn history_transcript(thread: &Thread) -> String {
    let end = thread
        .messages
        .iter()
        .rposition(|m| m.role == MessageRole::User)
        .unwrap_or(thread.messages.len());

    thread.messages[..end]
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| format!("{}: {}", m.role, m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn helper_schema(catalog: &Catalog, name: &str) -> Result<ToolSchema, EngineError> {
    catalog
        .descriptor(name)
        .map(ToolSchema::from)
        .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
}

async fn call_model(
    provider: &dyn LLMProvider,
    prompt: String,
    schema: ToolSchema,
    call_timeout: Duration,
) -> Result<(LLMResponse, TokenUsage), EngineError> {
    let messages = [Message::user(prompt)];
    let generation = timeout(call_timeout, provider.generate(&messages, &[schema]))
        .await
        .map_err(|_| EngineError::LLMTimeout)??;
    Ok((generation.response, generation.usage))
}

/// Rewrite the latest question into a standalone query
///
/// The returned usage is reported even when the reply is unusable.
pub async fn rephrase(
    provider: &dyn LLMProvider,
    catalog: &Catalog,
    template: &str,
    thread: &Thread,
    question: &str,
    call_timeout: Duration,
) -> (Result<String, EngineError>, TokenUsage) {
    let schema = match helper_schema(catalog, REPHRASE_TOOL) {
        Ok(schema) => schema,
        Err(e) => return (Err(e), TokenUsage::default()),
    };
    let history = history_transcript(thread);
    let prompt = render(template, &[("history", &history), ("question", question)]);

    let (response, usage) = match call_model(provider, prompt, schema, call_timeout).await {
        Ok(reply) => reply,
        Err(e) => return (Err(e), TokenUsage::default()),
    };

    let rewritten = match response {
        LLMResponse::ToolCalls { calls } => calls
            .iter()
            .find(|c| c.name == REPHRASE_TOOL)
            .ok_or_else(|| EngineError::ToolError("reply did not call rephrase_question".into()))
            .and_then(|call| Ok(ToolArgs::from_json_str(&call.arguments)?))
            .and_then(|args| Ok(args.param_str("question")?)),
        LLMResponse::FinalAnswer(answer) => Ok(answer.content),
    };

    let result = rewritten.and_then(|text| {
        let text = text.trim();
        if text.is_empty() {
            Err(EngineError::ToolError("empty rephrased question".into()))
        } else {
            Ok(text.to_string())
        }
    });
    (result, usage)
}

/// Binary relevance judgement over the retrieved passages
///
/// Errors only when the model call itself fails. A reply without a usable
/// `binary_score` counts as relevant.
pub async fn grade(
    provider: &dyn LLMProvider,
    catalog: &Catalog,
    template: &str,
    question: &str,
    passages: &[Passage],
    call_timeout: Duration,
) -> (Result<bool, EngineError>, TokenUsage) {
    let schema = match helper_schema(catalog, GRADE_TOOL) {
        Ok(schema) => schema,
        Err(e) => return (Err(e), TokenUsage::default()),
    };

    let documents = passages
        .iter()
        .map(|p| {
            let content: String = p.content.chars().take(MAX_GRADE_PASSAGE_CHARS).collect();
            format!("[{}] {}", p.source, content)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let prompt = render(template, &[("question", question), ("documents", &documents)]);

    let (response, usage) = match call_model(provider, prompt, schema, call_timeout).await {
        Ok(reply) => reply,
        Err(e) => return (Err(e), TokenUsage::default()),
    };

    let score = match &response {
        LLMResponse::ToolCalls { calls } => calls
            .iter()
            .find(|c| c.name == GRADE_TOOL)
            .and_then(|c| ToolArgs::from_json_str(&c.arguments).ok())
            .and_then(|args| args.param_str_opt("binary_score")),
        LLMResponse::FinalAnswer(answer) => Some(answer.content.clone()),
    };

    let verdict = match score.as_deref().map(|s| s.trim().to_lowercase()) {
        Some(s) if s == "no" => false,
        Some(s) if s == "yes" => true,
        other => {
            warn!(reply = ?other, "Unusable grading reply, treating passages as relevant");
            true
        }
    };
    (Ok(verdict), usage)
}
