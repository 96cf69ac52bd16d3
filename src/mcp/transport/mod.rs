//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all MCP transport
//! implementations must satisfy. Concrete implementations live in
//! submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`http::HttpTransport`] -- Streamable HTTP transport (one POST per
//!   message, JSON or SSE replies).
//! - [`sse::SseTransport`] -- legacy HTTP+SSE transport (long-lived GET
//!   stream plus a POST endpoint announced by the server).
//! - [`fake::FakeTransport`] -- in-process fake used in tests (cfg(test)
//!   only).
//!
//! [`TransportConnector`] turns a [`ServerDescriptor`] into a live transport
//! and is the only place where descriptor fields are checked.
//!
//! # Design
//!
//! Callers `send` a serialized JSON-RPC string and `receive` a stream of
//! serialized JSON-RPC strings (one per logical message). Framing and session
//! management are the responsibility of each concrete implementation.
//!
//! The `receive_err` stream carries transport-level diagnostics (e.g. stderr
//! output from a child process). Diagnostic output is never treated as an
//! error condition.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::error::{HostError, Result};
use crate::mcp::config::{ServerDescriptor, TransportKind};

/// Abstraction over MCP transport implementations.
///
/// Used polymorphically through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a complete JSON-RPC message string to the remote peer.
    ///
    /// The transport is responsible for any framing required by the
    /// underlying medium (a trailing newline for stdio, an HTTP POST for the
    /// HTTP transports).
    ///
    /// # Errors
    ///
    /// Returns [`HostError::McpTransport`] if the underlying I/O operation
    /// fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// The stream ends when the transport is closed or the remote peer
    /// disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Returns a stream of transport-level diagnostic strings.
    ///
    /// For stdio transports this carries lines written to the child process's
    /// stderr. For HTTP transports this stream may be empty.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Release the underlying process or connection.
    ///
    /// Idempotent, and safe to call after the peer has already gone away.
    async fn close(&self) -> Result<()>;

    /// Record the protocol revision negotiated during the handshake.
    ///
    /// Only the streamable HTTP transport needs it (as a request header).
    fn set_protocol_version(&self, _version: &str) {}
}

/// Opens transports for server descriptors.
///
/// The host goes through this seam so tests can count opens and closes
/// without real processes or sockets.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport for the server named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Connection`] if a required descriptor field is
    /// missing or the process/network operation fails.
    async fn connect(&self, name: &str, descriptor: &ServerDescriptor)
        -> Result<Arc<dyn Transport>>;
}

/// The production [`Connector`]: stdio, SSE and streamable HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransportConnector;

#[async_trait::async_trait]
impl Connector for TransportConnector {
    async fn connect(
        &self,
        name: &str,
        descriptor: &ServerDescriptor,
    ) -> Result<Arc<dyn Transport>> {
        let connection_error = |reason: String| HostError::Connection {
            server: name.to_string(),
            reason,
        };
        let timeout = Duration::from_secs(descriptor.timeout_seconds);

        let transport: Arc<dyn Transport> = match descriptor.transport {
            TransportKind::Stdio => {
                let command = descriptor
                    .command
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| connection_error("stdio transport requires `command`".into()))?;
                let args = descriptor
                    .args
                    .clone()
                    .ok_or_else(|| connection_error("stdio transport requires `args`".into()))?;

                let transport = stdio::StdioTransport::spawn(
                    PathBuf::from(command),
                    args,
                    descriptor.env.clone().unwrap_or_default(),
                    descriptor.cwd.clone(),
                )
                .map_err(|e| connection_error(e.to_string()))?;
                Arc::new(transport)
            }
            TransportKind::Sse => {
                let url = descriptor
                    .url
                    .clone()
                    .ok_or_else(|| connection_error("sse transport requires `url`".into()))?;
                let transport = sse::SseTransport::connect(url, descriptor.headers.clone(), timeout)
                    .await
                    .map_err(|e| connection_error(e.to_string()))?;
                Arc::new(transport)
            }
            TransportKind::StreamableHttp => {
                let url = descriptor.url.clone().ok_or_else(|| {
                    connection_error("streamable_http transport requires `url`".into())
                })?;
                let transport = http::HttpTransport::new(url, descriptor.headers.clone(), timeout)
                    .map_err(|e| connection_error(e.to_string()))?;
                Arc::new(transport)
            }
        };

        tracing::debug!(server = %name, transport = ?descriptor.transport, "transport opened");
        Ok(transport)
    }
}

pub mod http;
pub(crate) mod sse_parse;
pub mod sse;
pub mod stdio;

#[cfg(test)]
pub mod fake;
