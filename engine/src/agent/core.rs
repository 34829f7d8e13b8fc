//! Routing State Machine
//!
//! Drives one user turn through explicit states:
//!
//! ```text
//! PLAN ──answer──▶ ANSWER
//!  │  ▲
//!  │  └──────────────┐
//!  ▼                 │
//! DISPATCH ─▶ retrieval pipeline / external tools
//!  │
//!  └─failure / guard─▶ ERROR
//! ```
//!
//! # Limits
//!
//! - Recursion guard: at most `recursion_limit` PLAN→DISPATCH transitions per
//!   turn (thread override, else config, default 50)
//! - `llm.timeout_secs` per planning call
//! - `agent.tool_timeout_secs` per external tool call
//!
//! Failures end the turn with one generic assistant message and a support
//! reference; the detailed error only goes to the log. The thread stays
//! usable for the next turn.

use futures::future::join_all;
use sdk::errors::EngineError;
use sdk::tool::{ThreadContext, ToolCategory, ToolHandler, THREAD_ID_PARAM};
use sdk::types::{ToolArgs, ToolOutput};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::context::{build_context, context_chars};
use super::metadata::{MessageMetadata, MetadataEmitter};
use crate::config::Config;
use crate::llm::{LLMProvider, LLMResponse, ToolCall, ToolSchema};
use crate::prompts::{render, PromptStore};
use crate::registry::builtin::{PROMPT_SYSTEM, PROMPT_TOOL_FAILURE};
use crate::registry::Catalog;
use crate::retrieval::{PassageLookup, RetrievalPipeline, RetrievalRun};
use crate::thread::{Thread, ThreadMessage, Visibility};

/// Tool-result text recorded for a failed invocation
const FAILED_RESULT: &str = "Tool execution failed.";

/// Tool-result text recorded for invocations interrupted by cancellation
const CANCELLED_RESULT: &str = "Cancelled before completion.";

/// Used when the failure prompt itself cannot be resolved
const FALLBACK_FAILURE: &str = "Sorry, something went wrong while handling your request.";

/// State of the turn loop
#[derive(Debug)]
pub enum TurnState {
    /// Ask the model to answer or request tools
    Plan,

    /// Execute the tool calls of the last assistant message
    Dispatch(Vec<ToolCall>),

    /// Terminal: final answer text
    Answer(String),

    /// Terminal for this turn only
    Error(TurnFailure),
}

/// Why a turn failed
#[derive(Debug)]
pub struct TurnFailure {
    pub error: EngineError,
    /// Tool whose execution failed, if any
    pub tool: Option<String>,
}

impl TurnFailure {
    fn new(error: EngineError) -> Self {
        Self { error, tool: None }
    }

    fn tool(error: EngineError, tool: &str) -> Self {
        Self {
            error,
            tool: Some(tool.to_string()),
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Answered,
    Error,
}

/// Result of one turn
#[derive(Debug, Clone, serde::Serialize)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Text of the assistant message appended to the thread
    pub answer: String,
    pub metadata: MessageMetadata,
    /// PLAN→DISPATCH transitions taken
    pub iterations: usize,
}

/// Timeouts and ceilings applied to every turn
#[derive(Debug, Clone, Copy)]
pub struct TurnLimits {
    pub recursion_limit: usize,
    pub llm_timeout: Duration,
    pub tool_timeout: Duration,
}

impl TurnLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            recursion_limit: config.agent.recursion_limit,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            tool_timeout: Duration::from_secs(config.agent.tool_timeout_secs),
        }
    }
}

/// What dispatch decided to do with one invocation
enum CallPlan {
    Retrieve(String),
    AlreadyRetrieved,
    External(Arc<dyn ToolHandler>, bool),
    Reject(EngineError),
}

/// What happened to one invocation
enum CallResult {
    Retrieved(Box<RetrievalRun>),
    AlreadyRetrieved,
    External(Result<ToolOutput, EngineError>),
    Rejected(EngineError),
}

/// Per-turn scratch state
struct TurnScratch {
    ctx: ThreadContext,
    emitter: MetadataEmitter,
    dispatches: usize,
    retrieval_done: bool,
    /// Context block of this turn's retrieval, spliced into every later
    /// planning call of the same turn
    injection: Option<String>,
}

/// The turn loop over a frozen catalog
pub struct Orchestrator {
    provider: Arc<dyn LLMProvider>,
    catalog: Arc<Catalog>,
    prompts: Arc<PromptStore>,
    retrieval: RetrievalPipeline,
    limits: TurnLimits,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        catalog: Arc<Catalog>,
        prompts: Arc<PromptStore>,
        lookup: Arc<dyn PassageLookup>,
        config: &Config,
    ) -> Self {
        let limits = TurnLimits::from_config(config);
        let retrieval = RetrievalPipeline::new(
            provider.clone(),
            lookup,
            prompts.clone(),
            catalog.clone(),
            config.retrieval.clone(),
            limits.llm_timeout,
        );
        Self {
            provider,
            catalog,
            prompts,
            retrieval,
            limits,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn prompts(&self) -> &Arc<PromptStore> {
        &self.prompts
    }

    /// Run one user turn on `thread`
    ///
    /// Messages are appended to `thread` as the turn progresses; the caller
    /// persists it. Returns `Err(EngineError::Cancelled)` when `cancel`
    /// fires, leaving every result appended so far in place.
    pub async fn run_turn(
        &self,
        thread: &mut Thread,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let turn_id = Uuid::new_v4().to_string();
        let span = info_span!("turn", thread_id = %thread.id, turn_id = %turn_id);
        self.turn_loop(thread, user_text, turn_id, cancel)
            .instrument(span)
            .await
    }

    async fn turn_loop(
        &self,
        thread: &mut Thread,
        user_text: &str,
        turn_id: String,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        info!("Starting turn");
        thread.push(ThreadMessage::user(user_text));

        let mut turn = TurnScratch {
            ctx: ThreadContext::new(thread.id.clone(), turn_id.clone()),
            emitter: MetadataEmitter::new(turn_id),
            dispatches: 0,
            retrieval_done: false,
            injection: None,
        };
        let limit = thread
            .settings
            .recursion_limit
            .unwrap_or(self.limits.recursion_limit);

        let mut state = TurnState::Plan;
        loop {
            state = match state {
                TurnState::Plan => self.plan(thread, &mut turn, limit, cancel).await?,
                TurnState::Dispatch(calls) => {
                    self.dispatch(thread, &mut turn, &calls, cancel).await?
                }
                TurnState::Answer(text) => {
                    let metadata = turn.emitter.finish();
                    thread.push(ThreadMessage::assistant(text.clone()).with_metadata(metadata.clone()));
                    info!(iterations = turn.dispatches, "Turn answered");
                    return Ok(TurnOutcome {
                        status: TurnStatus::Answered,
                        answer: text,
                        metadata,
                        iterations: turn.dispatches,
                    });
                }
                TurnState::Error(failure) => return Ok(self.fail(thread, turn, failure)),
            };
        }
    }

    /// Tools offered for the next planning call
    fn offered_tools(&self, thread: &Thread, turn: &TurnScratch) -> Vec<ToolSchema> {
        let retrieval_tool = self.catalog.retrieval_tool();
        self.catalog
            .visible_tools(&thread.settings)
            .into_iter()
            .filter(|d| !(turn.retrieval_done && Some(d.name.as_str()) == retrieval_tool))
            .map(ToolSchema::from)
            .collect()
    }

    async fn plan(
        &self,
        thread: &mut Thread,
        turn: &mut TurnScratch,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<TurnState, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let pending = thread.pending_tool_calls();
        if !pending.is_empty() {
            return Ok(TurnState::Error(TurnFailure::new(EngineError::ToolError(format!(
                "tool calls without results before planning: {:?}",
                pending
            )))));
        }

        let system_prompt = match self.prompts.resolve(PROMPT_SYSTEM, Some(&thread.id)) {
            Ok(text) => text,
            Err(e) => return Ok(TurnState::Error(TurnFailure::new(e))),
        };
        let context = build_context(thread, &system_prompt, turn.injection.as_deref());
        let tools = self.offered_tools(thread, turn);

        debug!(
            messages = context.len(),
            chars = context_chars(&context),
            tools = tools.len(),
            injected = turn.injection.is_some(),
            "Planning call"
        );

        let call = timeout(self.limits.llm_timeout, self.provider.generate(&context, &tools));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = call => result,
        };

        let generation = match result {
            Ok(Ok(generation)) => generation,
            Ok(Err(e)) => return Ok(TurnState::Error(TurnFailure::new(e.into()))),
            Err(_) => return Ok(TurnState::Error(TurnFailure::new(EngineError::LLMTimeout))),
        };
        turn.emitter.record_usage(generation.usage);

        match generation.response {
            LLMResponse::FinalAnswer(answer) => Ok(TurnState::Answer(answer.content)),
            LLMResponse::ToolCalls { calls } if calls.is_empty() => {
                warn!("Model returned an empty tool call list, treating as empty answer");
                Ok(TurnState::Answer(String::new()))
            }
            LLMResponse::ToolCalls { calls } => {
                if turn.dispatches >= limit {
                    return Ok(TurnState::Error(TurnFailure::new(
                        EngineError::RecursionLimitExceeded { limit },
                    )));
                }
                turn.dispatches += 1;
                debug!(
                    iteration = turn.dispatches,
                    limit,
                    calls = calls.len(),
                    "Dispatching tool calls"
                );
                thread.push(ThreadMessage::assistant_with_tools("", calls.clone()));
                Ok(TurnState::Dispatch(calls))
            }
        }
    }

    /// Decide how each invocation is served, in invocation order
    fn plan_calls(&self, thread: &Thread, turn: &TurnScratch, calls: &[ToolCall]) -> Vec<CallPlan> {
        let retrieval_tool = self.catalog.retrieval_tool();
        let mut retrieval_claimed = turn.retrieval_done;

        calls
            .iter()
            .map(|call| {
                let Some(entry) = self.catalog.tool(&call.name) else {
                    return CallPlan::Reject(EngineError::ToolNotFound(call.name.clone()));
                };
                if !self.catalog.is_enabled(&entry.descriptor, &thread.settings) {
                    return CallPlan::Reject(EngineError::ToolDisabled(call.name.clone()));
                }

                match entry.descriptor.category {
                    ToolCategory::InternalRetrieval
                        if Some(call.name.as_str()) == retrieval_tool =>
                    {
                        if retrieval_claimed {
                            return CallPlan::AlreadyRetrieved;
                        }
                        retrieval_claimed = true;
                        let question = ToolArgs::from_json_str(&call.arguments)
                            .ok()
                            .and_then(|args| args.param_str_opt("query"))
                            .filter(|q| !q.trim().is_empty())
                            .or_else(|| thread.last_user_message().map(str::to_string))
                            .unwrap_or_default();
                        CallPlan::Retrieve(question)
                    }
                    // hidden pipeline helpers are never callable by the model
                    ToolCategory::InternalRetrieval => {
                        CallPlan::Reject(EngineError::ToolNotFound(call.name.clone()))
                    }
                    ToolCategory::External => match entry.handler.clone() {
                        Some(handler) => {
                            CallPlan::External(handler, entry.descriptor.is_thread_scoped())
                        }
                        None => CallPlan::Reject(EngineError::ToolNotFound(call.name.clone())),
                    },
                }
            })
            .collect()
    }

    async fn execute(
        &self,
        plan: CallPlan,
        call: &ToolCall,
        thread: &Thread,
        ctx: &ThreadContext,
    ) -> CallResult {
        match plan {
            CallPlan::Retrieve(question) => {
                CallResult::Retrieved(Box::new(self.retrieval.run(thread, &question).await))
            }
            CallPlan::AlreadyRetrieved => CallResult::AlreadyRetrieved,
            CallPlan::Reject(e) => CallResult::Rejected(e),
            CallPlan::External(handler, thread_scoped) => {
                let mut args = match ToolArgs::from_json_str(&call.arguments) {
                    Ok(args) => args,
                    Err(e) => return CallResult::External(Err(e.into())),
                };
                if thread_scoped {
                    args.insert(THREAD_ID_PARAM, serde_json::json!(ctx.thread_id));
                }
                let result = match timeout(self.limits.tool_timeout, handler.handle(args, ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::ToolTimeout(call.name.clone())),
                };
                CallResult::External(result)
            }
        }
    }

    async fn dispatch(
        &self,
        thread: &mut Thread,
        turn: &mut TurnScratch,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Result<TurnState, EngineError> {
        let retrieval_tool = self.catalog.retrieval_tool().map(str::to_string);
        let visibility_of = |call: &ToolCall| {
            if Some(&call.name) == retrieval_tool.as_ref() {
                Visibility::EphemeralInternal
            } else {
                Visibility::PersistentExternal
            }
        };

        if cancel.is_cancelled() {
            self.close_cancelled(thread, calls, &visibility_of);
            return Err(EngineError::Cancelled);
        }

        let plans = self.plan_calls(thread, turn, calls);
        let results = {
            let shared: &Thread = thread;
            let ctx = &turn.ctx;
            let all = join_all(
                plans
                    .into_iter()
                    .zip(calls)
                    .map(|(plan, call)| self.execute(plan, call, shared, ctx)),
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                results = all => Some(results),
            }
        };
        let Some(results) = results else {
            self.close_cancelled(thread, calls, &visibility_of);
            return Err(EngineError::Cancelled);
        };

        let mut failure: Option<TurnFailure> = None;
        for (call, result) in calls.iter().zip(results) {
            match result {
                CallResult::Retrieved(run) => {
                    let run = *run;
                    thread.push(ThreadMessage::tool_result(
                        &call.id,
                        run.artifact.audit_payload().to_string(),
                        Visibility::EphemeralInternal,
                    ));
                    turn.emitter.record_usage(run.usage);
                    turn.emitter.record_retrieval(run.artifact.metadata());
                    turn.injection = run.context_block;
                    turn.retrieval_done = true;
                }
                CallResult::AlreadyRetrieved => {
                    thread.push(ThreadMessage::tool_result(
                        &call.id,
                        serde_json::json!({
                            "status": "already_retrieved",
                            "note": "Retrieval already ran in this turn; its context is in the system message."
                        })
                        .to_string(),
                        Visibility::EphemeralInternal,
                    ));
                }
                CallResult::External(Ok(output)) => {
                    thread.push(ThreadMessage::tool_result(
                        &call.id,
                        output.render(),
                        Visibility::PersistentExternal,
                    ));
                }
                CallResult::External(Err(e)) | CallResult::Rejected(e) => {
                    thread.push(ThreadMessage::tool_result(
                        &call.id,
                        FAILED_RESULT,
                        visibility_of(call),
                    ));
                    if failure.is_none() {
                        failure = Some(TurnFailure::tool(e, &call.name));
                    } else {
                        warn!(tool = %call.name, error = %e, "Additional tool failure in the same dispatch");
                    }
                }
            }
        }

        Ok(match failure {
            Some(failure) => TurnState::Error(failure),
            None => TurnState::Plan,
        })
    }

    /// Give every unanswered invocation a result so the thread stays usable
    fn close_cancelled(
        &self,
        thread: &mut Thread,
        calls: &[ToolCall],
        visibility_of: &dyn Fn(&ToolCall) -> Visibility,
    ) {
        let pending = thread.pending_tool_calls();
        for call in calls.iter().filter(|c| pending.contains(&c.id)) {
            thread.push(ThreadMessage::tool_result(
                &call.id,
                CANCELLED_RESULT,
                visibility_of(call),
            ));
        }
        warn!(closed = pending.len(), "Turn cancelled during dispatch");
    }

    fn fail(&self, thread: &mut Thread, mut turn: TurnScratch, failure: TurnFailure) -> TurnOutcome {
        let reference = Uuid::new_v4().to_string();
        error!(
            support_reference = %reference,
            tool = ?failure.tool,
            error = %failure.error,
            iterations = turn.dispatches,
            "Turn failed"
        );

        let answer = match self.prompts.resolve(PROMPT_TOOL_FAILURE, Some(&thread.id)) {
            Ok(template) => render(&template, &[("reference", &reference)]),
            Err(_) => format!("{} (reference {})", FALLBACK_FAILURE, reference),
        };

        turn.emitter.record_support_reference(&reference);
        let metadata = turn.emitter.finish();
        thread.push(ThreadMessage::assistant(answer.clone()).with_metadata(metadata.clone()));

        TurnOutcome {
            status: TurnStatus::Error,
            answer,
            metadata,
            iterations: turn.dispatches,
        }
    }
}
