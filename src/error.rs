//! Error types for mcphost
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for mcphost operations
///
/// Startup failures (`Connection`, `Handshake`) abort the whole host. The
/// per-invocation kinds (`UnsupportedContent`, `UnresolvedTool` and the MCP
/// request failures) are turned into tool-role messages by the host so the
/// model can react to them. `CompletionEndpoint` propagates to the caller of
/// the turn.
#[derive(Error, Debug)]
pub enum HostError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A transport could not be established for a tool server
    #[error("Connection error for server `{server}`: {reason}")]
    Connection {
        /// Configured server name
        server: String,
        /// What went wrong
        reason: String,
    },

    /// The MCP capability negotiation did not complete
    #[error("Handshake error for server `{server}`: {reason}")]
    Handshake {
        /// Configured server name
        server: String,
        /// What went wrong
        reason: String,
    },

    /// A tool result carried a content variant that cannot be represented
    #[error("Unsupported content type `{kind}` returned by tool `{tool}` on server `{server}`")]
    UnsupportedContent {
        /// Server that produced the content
        server: String,
        /// Tool that produced the content
        tool: String,
        /// Wire `type` of the offending item
        kind: String,
    },

    /// No connected server exposes the requested tool name
    #[error("Unresolved tool: no server provides `{0}`")]
    UnresolvedTool(String),

    /// The same tool name is exposed by several servers (strict mode only)
    #[error("Tool name conflict: `{tool}` is provided by {}", servers.join(", "))]
    ToolNameConflict {
        /// Conflicting tool name
        tool: String,
        /// Servers exposing it, in configuration order
        servers: Vec<String>,
    },

    /// The completion endpoint call failed
    #[error("Completion endpoint error: {0}")]
    CompletionEndpoint(String),

    /// The configured turn guard was reached
    #[error("Maximum turns exceeded: limit={limit}")]
    MaxTurnsExceeded {
        /// The configured turn limit
        limit: usize,
    },

    /// The turn was cancelled by the user or an external signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Session storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// MCP transport-level failure (I/O, HTTP status, closed channel)
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// An MCP request did not receive a response in time
    #[error("MCP timeout: server `{server}` did not answer `{method}`")]
    McpTimeout {
        /// Server name, or `(unknown)` below the session layer
        server: String,
        /// JSON-RPC method that timed out
        method: String,
    },

    /// The server answered with a JSON-RPC error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// The server selected a protocol revision this client does not speak
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    McpProtocolVersion {
        /// Versions this client accepts
        expected: Vec<String>,
        /// Version the server returned
        got: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for mcphost operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
