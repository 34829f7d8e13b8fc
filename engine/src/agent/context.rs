//! Context Sanitizer
//!
//! Builds the exact message list sent to the model for one planning call.
//! Ephemeral retrieval records never reach the model from history; the
//! current turn's retrieval block is spliced into the system message for
//! this call only. The thread itself is never modified.

use crate::llm::{Message, MessageRole};
use crate::thread::{Thread, ThreadMessage};
use std::collections::HashSet;

/// Call ids answered by ephemeral results in the run of tool-result messages
/// directly following `messages[index]`
///
/// Providers may reuse call ids across turns, so a call id only identifies a
/// result within its own assistant message's run.
pub(crate) fn ephemeral_answers(messages: &[ThreadMessage], index: usize) -> HashSet<&str> {
    messages[index + 1..]
        .iter()
        .take_while(|m| m.role == MessageRole::Tool)
        .filter(|m| m.is_ephemeral())
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect()
}

/// An assistant message with no text whose every call was answered
/// ephemerally; the model never sees it
pub(crate) fn is_internal_request(messages: &[ThreadMessage], index: usize) -> bool {
    let message = &messages[index];
    if message.role != MessageRole::Assistant
        || message.tool_calls.is_empty()
        || !message.content.trim().is_empty()
    {
        return false;
    }
    let answered = ephemeral_answers(messages, index);
    message
        .tool_calls
        .iter()
        .all(|call| answered.contains(call.id.as_str()))
}

/// Build the sanitized context for a planning call
///
/// - system message first, with `injection` appended when present
/// - every persisted message except ephemeral tool results
/// - tool calls whose results were ephemeral are stripped from their
///   assistant message so no call is left without a result; an assistant
///   message left with neither text nor calls is dropped
pub fn build_context(thread: &Thread, system_prompt: &str, injection: Option<&str>) -> Vec<Message> {
    let system = match injection {
        Some(block) if !block.trim().is_empty() => format!("{}\n\n{}", system_prompt, block),
        _ => system_prompt.to_string(),
    };

    let mut context = Vec::with_capacity(thread.messages.len() + 1);
    context.push(Message::system(system));

    for (index, persisted) in thread.messages.iter().enumerate() {
        if persisted.is_ephemeral() {
            continue;
        }

        let mut message = persisted.to_message();
        if message.role == MessageRole::Assistant && !message.tool_calls.is_empty() {
            let ephemeral_calls = ephemeral_answers(&thread.messages, index);
            message
                .tool_calls
                .retain(|call| !ephemeral_calls.contains(call.id.as_str()));
            if message.tool_calls.is_empty() && message.content.trim().is_empty() {
                continue;
            }
        }
        context.push(message);
    }

    context
}

/// Total characters of content in a context, used for size accounting
pub fn context_chars(context: &[Message]) -> usize {
    context
        .iter()
        .map(|m| {
            m.content.len()
                + m.tool_calls
                    .iter()
                    .map(|c| c.name.len() + c.arguments.len())
                    .sum::<usize>()
        })
        .sum()
}
