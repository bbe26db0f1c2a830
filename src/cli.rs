//! Command-line interface definition for mathchat
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for the HTTP server, the interactive tutor, one-shot
//! questions, and history management.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mathchat - graduate-exam math tutor
///
/// Ask questions through a resilient completion pipeline and keep a
/// searchable, synchronized conversation history.
#[derive(Parser, Debug, Clone)]
#[command(name = "mathchat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory holding the session history (overrides config and
    /// MATHCHAT_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mathchat
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve the chat API over HTTP
    Serve {
        /// Address to bind, e.g. 127.0.0.1:3000
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Start an interactive tutoring session
    Chat {
        /// Continue a stored session by id
        #[arg(short, long)]
        resume: Option<String>,
    },

    /// Ask one question and print the reply without saving it
    Ask {
        /// The question
        message: String,
    },

    /// Check whether the completion service is reachable and answering
    Check {
        /// Probe deadline in seconds
        #[arg(short, long, default_value_t = crate::diagnostics::DEFAULT_CHECK_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Inspect and manage stored sessions
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

/// History management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List stored sessions
    List,

    /// Find sessions whose title or messages contain a term
    Search {
        /// Case-insensitive search term
        term: String,
    },

    /// Print every message of one session
    Show {
        /// Session id
        id: String,
    },

    /// Delete one session
    Delete {
        /// Session id
        id: String,
    },

    /// Delete every session
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Write the history to a JSON file
    Export {
        /// Output path (defaults to chat-history-<date>.json in the
        /// current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
