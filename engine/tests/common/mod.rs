//! Shared fixtures for the engine integration tests
//!
//! `ScriptedProvider` answers planning calls from a script and the two
//! retrieval helper calls (rephrase, grade) from their own scripts, so one
//! test can drive a whole turn deterministically.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_engine::agent::Orchestrator;
use parley_engine::config::{Config, SourceConfig};
use parley_engine::llm::{
    FinalAnswer, Generation, LLMError, LLMProvider, LLMResponse, Message, TokenUsage, ToolCall,
    ToolSchema,
};
use parley_engine::prompts::PromptStore;
use parley_engine::registry::builtin::{GRADE_TOOL, REPHRASE_TOOL};
use parley_engine::registry::{auth_from_config, discover, modules_from_config, Catalog};
use parley_engine::retrieval::{InMemoryPassageIndex, PassageLookup};
use sdk::errors::EngineError;
use sdk::registrar::{AuthContext, ExtensionModule, Registrar};
use sdk::tool::{ThreadContext, ToolDescriptor, ToolHandler};
use sdk::types::{ToolArgs, ToolOutput};

/// One scripted reply
#[derive(Clone)]
pub enum Step {
    Reply(Generation),
    Fail(String),
    /// Never returns; used to hold a call open for cancellation
    Hang,
}

pub fn answer(text: &str) -> Step {
    Step::Reply(Generation::new(
        LLMResponse::FinalAnswer(FinalAnswer::new(text)),
        TokenUsage::new(10, 5),
    ))
}

pub fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string())
}

pub fn calls(calls: Vec<ToolCall>) -> Step {
    Step::Reply(Generation::new(
        LLMResponse::ToolCalls { calls },
        TokenUsage::new(10, 5),
    ))
}

pub fn grade_reply(score: &str) -> Step {
    calls(vec![call("g", GRADE_TOOL, json!({ "binary_score": score }))])
}

pub fn rephrase_reply(question: &str) -> Step {
    calls(vec![call("r", REPHRASE_TOOL, json!({ "question": question }))])
}

/// What the provider saw on one planning call
#[derive(Debug, Clone)]
pub struct PlanningCall {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

impl PlanningCall {
    pub fn system(&self) -> &str {
        &self.messages[0].content
    }
}

#[derive(Default)]
struct Scripts {
    planner: VecDeque<Step>,
    grader: VecDeque<Step>,
    rephraser: VecDeque<Step>,
    planner_repeat: Option<Step>,
    planning_calls: Vec<PlanningCall>,
    grade_prompts: Vec<String>,
    rephrase_prompts: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<Scripts>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(self, step: Step) -> Self {
        self.scripts.lock().unwrap().planner.push_back(step);
        self
    }

    /// Reply with `step` to every planning call once the script runs out
    pub fn plan_forever(self, step: Step) -> Self {
        self.scripts.lock().unwrap().planner_repeat = Some(step);
        self
    }

    pub fn grade(self, step: Step) -> Self {
        self.scripts.lock().unwrap().grader.push_back(step);
        self
    }

    pub fn rephrase(self, step: Step) -> Self {
        self.scripts.lock().unwrap().rephraser.push_back(step);
        self
    }

    pub fn planning_calls(&self) -> Vec<PlanningCall> {
        self.scripts.lock().unwrap().planning_calls.clone()
    }

    pub fn grade_prompts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().grade_prompts.clone()
    }

    pub fn rephrase_prompts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().rephrase_prompts.clone()
    }

    fn next_step(&self, messages: &[Message], tools: &[ToolSchema]) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        let only = |name: &str| tools.len() == 1 && tools[0].name == name;

        if only(GRADE_TOOL) {
            scripts.grade_prompts.push(messages[0].content.clone());
            return scripts.grader.pop_front().unwrap_or_else(|| grade_reply("yes"));
        }
        if only(REPHRASE_TOOL) {
            scripts.rephrase_prompts.push(messages[0].content.clone());
            return scripts
                .rephraser
                .pop_front()
                .unwrap_or_else(|| Step::Fail("no rephrase scripted".into()));
        }

        scripts.planning_calls.push(PlanningCall {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        match scripts.planner.pop_front() {
            Some(step) => step,
            None => scripts
                .planner_repeat
                .clone()
                .unwrap_or_else(|| answer("(script exhausted)")),
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<Generation, LLMError> {
        match self.next_step(messages, tools) {
            Step::Reply(generation) => Ok(generation),
            Step::Fail(reason) => Err(LLMError::ProviderUnavailable(reason)),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(LLMError::Timeout)
            }
        }
    }
}

/// Config with two document sources and the default extension modules
pub fn test_config() -> Config {
    let mut config = Config::default_config();
    config.retrieval.sources = vec![
        SourceConfig {
            name: "DOCS".to_string(),
            description: "Product documentation: server port, logging, configuration".to_string(),
            embedding_model: "default".to_string(),
        },
        SourceConfig {
            name: "HR".to_string(),
            description: "Human resources: vacation, payroll, benefits".to_string(),
            embedding_model: "default".to_string(),
        },
    ];
    config
}

pub fn docs_index() -> InMemoryPassageIndex {
    InMemoryPassageIndex::new()
        .with_passage("DOCS", "The server listens on the default port 8080.")
        .with_passage("DOCS", "Logs are written to stderr in JSON format.")
        .with_passage("HR", "Employees receive 25 vacation days per year.")
}

/// Handler that records what it was called with
#[derive(Default)]
pub struct RecordingTool {
    pub calls: Mutex<Vec<(Value, ThreadContext)>>,
    pub delay: Duration,
    pub fail: bool,
    pub reply: String,
}

impl RecordingTool {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            ..Self::default()
        })
    }

    pub fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay,
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn seen(&self) -> Vec<(Value, ThreadContext)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolHandler for RecordingTool {
    async fn handle(&self, args: ToolArgs, ctx: &ThreadContext) -> Result<ToolOutput, EngineError> {
        self.calls.lock().unwrap().push((args.as_value(), ctx.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(EngineError::ToolError("upstream returned 503".to_string()));
        }
        Ok(ToolOutput::text(self.reply.clone()))
    }
}

/// Test module registering the given external tools
pub struct TestTools {
    pub tools: Vec<(String, Arc<RecordingTool>)>,
}

impl ExtensionModule for TestTools {
    fn name(&self) -> &str {
        "test-tools"
    }

    fn register(&self, registrar: &mut dyn Registrar, _auth: &AuthContext) -> Result<(), EngineError> {
        for (name, handler) in &self.tools {
            registrar.register_tool(
                ToolDescriptor::external(
                    name.clone(),
                    format!("Test tool {}", name),
                    json!({ "type": "object", "properties": {} }),
                ),
                Some(handler.clone() as Arc<dyn ToolHandler>),
            )?;
        }
        Ok(())
    }
}

pub fn catalog_with(config: &Config, tools: Vec<(&str, Arc<RecordingTool>)>) -> Arc<Catalog> {
    let mut modules = modules_from_config(&config.extensions).unwrap();
    modules.push(Arc::new(TestTools {
        tools: tools
            .into_iter()
            .map(|(name, handler)| (name.to_string(), handler))
            .collect(),
    }));
    Arc::new(discover(&modules, &auth_from_config(&config.extensions)).unwrap())
}

pub fn orchestrator(
    provider: Arc<ScriptedProvider>,
    catalog: Arc<Catalog>,
    lookup: Arc<dyn PassageLookup>,
    config: &Config,
) -> Orchestrator {
    let prompts = Arc::new(PromptStore::new(catalog.clone()));
    Orchestrator::new(provider, catalog, prompts, lookup, config)
}
