//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - chat: interactive turns on one thread
//! - ask: a single turn
//! - tools: list the frozen catalog
//! - history: show stored threads and messages
//! - ingest: add a text file to a document source

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{Orchestrator, TurnOutcome, TurnStatus};
use crate::config::Config;
use crate::db::{Database, ThreadRepository};
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::LLMProvider;
use crate::prompts::PromptStore;
use crate::registry::{auth_from_config, discover, modules_from_config, Catalog};
use crate::thread::{Thread, ThreadSettings, ThreadStore};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Build the configured model provider
pub fn build_provider(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    let timeout = std::time::Duration::from_secs(config.llm.timeout_secs);
    match config.llm.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::with_timeout(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.model.clone(),
            timeout,
        ))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config.llm.openai.clone()))),
        other => Err(anyhow!("Unknown LLM provider '{}'", other)),
    }
}

/// Run extension discovery and freeze the catalog
pub fn build_catalog(config: &Config) -> Result<Arc<Catalog>> {
    let modules = modules_from_config(&config.extensions)?;
    let auth = auth_from_config(&config.extensions);
    let catalog = discover(&modules, &auth).context("Extension discovery failed")?;
    Ok(Arc::new(catalog))
}

/// Everything a turn needs, wired from configuration
struct Session {
    database: Database,
    threads: ThreadRepository,
    orchestrator: Orchestrator,
}

impl Session {
    async fn open(config: &Config) -> Result<Self> {
        let database = Database::new(&config.database_path())
            .await
            .context("Failed to open database")?;

        let catalog = build_catalog(config)?;
        let prompts = Arc::new(PromptStore::new(catalog.clone()));
        let provider = build_provider(config)?;
        if !provider.check_health().await {
            warn!(provider = %provider.name(), "LLM provider did not respond to health check");
        }

        let orchestrator = Orchestrator::new(
            provider,
            catalog,
            prompts,
            Arc::new(database.passages()),
            config,
        );

        Ok(Self {
            threads: database.threads(),
            database,
            orchestrator,
        })
    }

    async fn thread(&self, id: Option<String>, settings: &ThreadSettings) -> Result<Thread> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.threads
            .load_or_create(&id, settings)
            .await
            .context("Failed to load thread")
    }

    /// Run one turn and persist the thread whatever the outcome
    async fn turn(
        &self,
        thread: &mut Thread,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TurnOutcome>> {
        let result = self.orchestrator.run_turn(thread, text, cancel).await;
        self.threads
            .save(thread)
            .await
            .context("Failed to save thread")?;

        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(sdk::errors::EngineError::Cancelled) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(self) -> Result<()> {
        self.database.close().await
    }
}

fn print_outcome(thread_id: &str, outcome: &TurnOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{}", outcome.answer);
            if let Some(retrieval) = &outcome.metadata.retrieval {
                if !retrieval.sources.is_empty() {
                    println!("  [sources: {}]", retrieval.sources.join(", "));
                }
            }
            if outcome.status == TurnStatus::Error {
                if let Some(reference) = &outcome.metadata.support_reference {
                    eprintln!("  (support reference {})", reference);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "thread_id": thread_id,
                "outcome": outcome,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Cancel the token on Ctrl-C for the lifetime of the returned guard
fn cancel_on_ctrl_c() -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let token = CancellationToken::new();
    let child = token.clone();
    let handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling turn");
            child.cancel();
        }
    });
    (token, handle)
}

/// Run a single turn
pub async fn handle_ask(
    text: String,
    thread_id: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let session = Session::open(config).await?;
    let mut thread = session
        .thread(thread_id, &ThreadSettings::from(&config.threads))
        .await?;

    let (cancel, watcher) = cancel_on_ctrl_c();
    let outcome = session.turn(&mut thread, &text, &cancel).await;
    watcher.abort();

    match outcome? {
        Some(outcome) => print_outcome(&thread.id, &outcome, format)?,
        None => eprintln!("Turn cancelled."),
    }

    session.close().await
}

/// Interactive loop: one turn per stdin line until EOF or `/quit`
pub async fn handle_chat(
    thread_id: Option<String>,
    no_retrieval: bool,
    no_tools: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let session = Session::open(config).await?;
    let mut thread = session
        .thread(thread_id, &ThreadSettings::from(&config.threads))
        .await?;

    if no_retrieval || no_tools {
        thread.settings.retrieval_enabled &= !no_retrieval;
        thread.settings.external_tools_enabled &= !no_tools;
        session.threads.save(&thread).await?;
    }

    if matches!(format, OutputFormat::Text) {
        println!("Thread {} (type /quit to exit)", thread.id);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let (cancel, watcher) = cancel_on_ctrl_c();
        let outcome = session.turn(&mut thread, line, &cancel).await;
        watcher.abort();

        match outcome? {
            Some(outcome) => print_outcome(&thread.id, &outcome, format)?,
            None => eprintln!("Turn cancelled."),
        }
    }

    session.close().await
}

/// List the registered tools and prompts
pub async fn handle_tools(config: &Config, format: OutputFormat) -> Result<()> {
    let catalog = build_catalog(config)?;
    let settings = ThreadSettings::from(&config.threads);

    match format {
        OutputFormat::Text => {
            println!("Tools:");
            for entry in catalog.tools() {
                let d = &entry.descriptor;
                let state = if !d.model_visible {
                    "hidden"
                } else if catalog.is_enabled(d, &settings) {
                    "enabled"
                } else {
                    "disabled"
                };
                println!(
                    "  {:<24} {:<20} {:<8} [{}] {}",
                    d.name, d.category, state, entry.module, d.description
                );
            }
            println!();
            println!("Prompts:");
            for entry in catalog.prompts() {
                println!("  {:<24} [{}]", entry.template.name, entry.module);
            }
        }
        OutputFormat::Json => {
            let tools: Vec<_> = catalog
                .tools()
                .map(|entry| {
                    json!({
                        "name": entry.descriptor.name,
                        "description": entry.descriptor.description,
                        "category": entry.descriptor.category.to_string(),
                        "model_visible": entry.descriptor.model_visible,
                        "enabled": catalog.is_enabled(&entry.descriptor, &settings),
                        "module": entry.module,
                    })
                })
                .collect();
            let prompts: Vec<_> = catalog
                .prompts()
                .map(|entry| json!({ "name": entry.template.name, "module": entry.module }))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "tools": tools, "prompts": prompts }))?
            );
        }
    }

    Ok(())
}

/// Show stored history
///
/// This is the audit view: ephemeral retrieval records are included and
/// marked.
pub async fn handle_history(
    thread_id: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;
    let repo = database.threads();

    match thread_id {
        None => {
            let threads = repo.list_threads().await?;
            match format {
                OutputFormat::Text => {
                    if threads.is_empty() {
                        println!("No threads in history");
                    }
                    for summary in threads {
                        let created = chrono::DateTime::from_timestamp(summary.created_at, 0)
                            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        println!(
                            "{}  {} messages  created {}",
                            summary.id, summary.message_count, created
                        );
                    }
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&threads)?);
                }
            }
        }
        Some(id) => {
            let thread = repo
                .get_thread(&id)
                .await?
                .ok_or_else(|| anyhow!("Thread '{}' not found", id))?;
            match format {
                OutputFormat::Text => {
                    println!("Thread {} ({} messages)", thread.id, thread.messages.len());
                    println!();
                    for message in &thread.messages {
                        let marker = if message.is_ephemeral() { " [internal]" } else { "" };
                        println!("{}{}:", message.role, marker);
                        if !message.content.is_empty() {
                            println!("  {}", message.content.replace('\n', "\n  "));
                        }
                        for call in &message.tool_calls {
                            println!("  -> {}({})", call.name, call.arguments);
                        }
                    }
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&thread)?);
                }
            }
        }
    }

    database.close().await
}

/// Chunk a text file into passages of a configured source
pub async fn handle_ingest(
    source: String,
    file: &Path,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    if !config.retrieval.sources.iter().any(|s| s.name == source) {
        bail!(
            "Source '{}' is not configured; add it under [[retrieval.sources]]",
            source
        );
    }

    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;
    let added = database.passages().ingest_text(&source, &text).await?;
    info!(source = %source, passages = added, "Ingested file");

    match format {
        OutputFormat::Text => println!("Added {} passages to {}", added, source),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "source": source, "passages": added }))?
        ),
    }

    database.close().await
}
