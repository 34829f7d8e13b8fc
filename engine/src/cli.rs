//! CLI interface for Parley
//!
//! Command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parley conversational engine
///
/// Answers questions over configured document sources and registered tools,
/// one thread at a time.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive conversation on a thread (reads lines from stdin)
    Chat {
        /// Thread to continue (a new thread is created when omitted)
        #[arg(long)]
        thread: Option<String>,

        /// Disable retrieval for this thread
        #[arg(long)]
        no_retrieval: bool,

        /// Disable external tools for this thread
        #[arg(long)]
        no_tools: bool,
    },

    /// Run a single turn and print the answer
    Ask {
        /// The question to ask
        text: String,

        /// Thread to continue (a new thread is created when omitted)
        #[arg(long)]
        thread: Option<String>,
    },

    /// List registered tools and prompts
    Tools,

    /// Show the full stored history of a thread, or list threads
    History {
        /// Thread ID (lists all threads when omitted)
        thread: Option<String>,
    },

    /// Add a text file to a document source
    Ingest {
        /// Source name (must be configured under [[retrieval.sources]])
        source: String,

        /// Text file to chunk and index
        file: PathBuf,
    },
}
