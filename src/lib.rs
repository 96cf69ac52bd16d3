//! mcphost - MCP host library
//!
//! This library connects an OpenAI-compatible chat-completion endpoint to
//! a set of MCP tool servers. Each server runs its own tool session over
//! stdio, SSE or streamable HTTP; the host merges their tools into one
//! namespace, runs the model's tool-calling loop and persists the
//! conversation after every step.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `mcp`: JSON-RPC client, transports and the per-server tool session
//! - `host`: Tool namespace merging and the orchestration loop
//! - `providers`: Message model and the completion endpoint client
//! - `storage`: Atomic JSON session persistence
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use mcphost::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     // Host usage would go here
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod host;
pub mod mcp;
pub mod providers;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{HostError, Result};
pub use host::Host;

#[cfg(test)]
pub mod test_utils;
