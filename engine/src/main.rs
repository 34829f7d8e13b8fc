// Parley Engine
// Main entry point for the parley binary

use clap::Parser;
use parley_engine::cli::{Cli, Command};
use parley_engine::config::Config;
use parley_engine::handlers::{
    handle_ask, handle_chat, handle_history, handle_ingest, handle_tools, OutputFormat,
};
use parley_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    match cli.log.as_deref() {
        Some(level) => init_telemetry_with_level(level),
        None if config.core.log_level.is_empty() => init_telemetry(),
        None => init_telemetry_with_level(&config.core.log_level),
    }

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Parley Engine v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Chat {
            thread,
            no_retrieval,
            no_tools,
        } => handle_chat(thread, no_retrieval, no_tools, &config, format).await,

        Command::Ask { text, thread } => {
            tracing::debug!("Single turn on thread {:?}", thread);
            handle_ask(text, thread, &config, format).await
        }

        Command::Tools => handle_tools(&config, format).await,

        Command::History { thread } => handle_history(thread, &config, format).await,

        Command::Ingest { source, file } => {
            tracing::info!("Ingesting {} into {}", file.display(), source);
            handle_ingest(source, &file, &config, format).await
        }
    }
}
