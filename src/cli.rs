//! Command-line interface definition for mcphost
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for chat, one-shot prompts, tool inspection and
//! session management.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mcphost - connect a chat model to MCP tool servers
///
/// Tool servers are reached over stdio, SSE or streamable HTTP; their tools
/// are merged into one namespace that the model can call.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcphost")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Path to a file holding only the server map (JSON or YAML); replaces
    /// the `servers` section of the configuration
    #[arg(long, global = true)]
    pub servers: Option<PathBuf>,

    /// Session name (file `<session-dir>/<name>.json`)
    #[arg(short, long, global = true)]
    pub session: Option<String>,

    /// Directory holding session files
    #[arg(long, global = true)]
    pub session_dir: Option<PathBuf>,

    /// Stop a turn after this many completion calls
    #[arg(long, global = true)]
    pub max_turns: Option<usize>,

    /// Refuse to start when two servers expose the same tool name
    #[arg(long, global = true)]
    pub strict_tools: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mcphost
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start an interactive chat with the model and the configured tools
    Chat,

    /// Send one prompt, run the tool loop to completion and print the answer
    Run {
        /// Prompt to execute
        #[arg(short, long)]
        prompt: String,
    },

    /// Connect to every server and print the merged tool namespace
    Tools {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear the persisted session
    Session {
        /// Session subcommand
        #[command(subcommand)]
        command: SessionCommand,
    },
}

/// Session management subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Print the stored messages
    Show {
        /// Print the raw JSON array
        #[arg(long)]
        json: bool,
    },

    /// Delete the stored session
    Clear,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            servers: None,
            session: None,
            session_dir: None,
            max_turns: None,
            strict_tools: false,
            verbose: false,
            json_logs: false,
            command: Commands::Chat,
        }
    }
}
