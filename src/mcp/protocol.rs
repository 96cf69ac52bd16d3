//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! Two types represent the two phases of an MCP client session:
//!
//! - [`McpProtocol`] -- an uninitialized client. Call [`McpProtocol::initialize`]
//!   to perform the `initialize` / `notifications/initialized` handshake.
//! - [`InitializedMcpProtocol`] -- a negotiated session exposing `tools/list`,
//!   `tools/call` and `ping` as typed async methods.
//!
//! Neither type owns a transport; callers wire up channels externally and pass
//! the resulting [`JsonRpcClient`] into [`McpProtocol::new`].

use std::time::Duration;

use crate::error::{HostError, Result};
use crate::mcp::client::{JsonRpcClient, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, ListToolsResponse, McpTool, PaginatedParams, LATEST_PROTOCOL_VERSION,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// An uninitialized MCP client session.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tokio::sync::mpsc;
/// use mcphost::mcp::client::JsonRpcClient;
/// use mcphost::mcp::protocol::McpProtocol;
///
/// let (tx, _rx) = mpsc::unbounded_channel::<String>();
/// let _proto = McpProtocol::new(JsonRpcClient::new(tx), Duration::from_secs(60));
/// ```
#[derive(Debug)]
pub struct McpProtocol {
    client: JsonRpcClient,
    timeout: Duration,
}

impl McpProtocol {
    /// Create a new uninitialized protocol session.
    ///
    /// `timeout` bounds every request issued through this session, including
    /// the handshake. The caller must already have started the read loop for
    /// `client`.
    pub fn new(client: JsonRpcClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Perform the MCP `initialize` / `notifications/initialized` handshake.
    ///
    /// Proposes [`LATEST_PROTOCOL_VERSION`], verifies that the server's chosen
    /// revision is in [`SUPPORTED_PROTOCOL_VERSIONS`], then sends the
    /// `notifications/initialized` notification.
    ///
    /// # Errors
    ///
    /// - [`HostError::McpProtocolVersion`] if the server picked a revision
    ///   this client does not speak.
    /// - [`HostError::McpTransport`] if the message could not be delivered.
    /// - [`HostError::McpTimeout`] if the server does not answer in time.
    pub async fn initialize(
        self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities,
                    client_info,
                },
                Some(self.timeout),
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(HostError::McpProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        self.client
            .notify(METHOD_INITIALIZED, serde_json::json!({}))?;

        tracing::debug!(
            server = %self.client.label(),
            version = %response.protocol_version,
            peer = %response.server_info.name,
            "MCP handshake complete"
        );

        Ok(InitializedMcpProtocol {
            client: self.client,
            timeout: self.timeout,
            initialize_response: response,
        })
    }
}

/// A fully negotiated MCP client session.
#[derive(Debug)]
pub struct InitializedMcpProtocol {
    /// The underlying JSON-RPC client.
    pub client: JsonRpcClient,
    timeout: Duration,
    /// The server's response to the `initialize` request.
    pub initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// Protocol revision the server selected during the handshake.
    pub fn protocol_version(&self) -> &str {
        &self.initialize_response.protocol_version
    }

    /// Whether the server advertised the `tools` capability.
    ///
    /// Servers that omit it are still queried; some older servers list
    /// tools without declaring the capability.
    pub fn advertises_tools(&self) -> bool {
        self.initialize_response.capabilities.tools.is_some()
    }

    /// List all tools advertised by the server, following `nextCursor`
    /// until the server stops returning one.
    ///
    /// # Errors
    ///
    /// Returns an error if any paged request fails.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let resp: ListToolsResponse = self
                .client
                .request(
                    METHOD_TOOLS_LIST,
                    PaginatedParams { cursor },
                    Some(self.timeout),
                )
                .await?;

            tools.extend(resp.tools);

            match resp.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Invoke a named tool on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns a JSON-RPC error.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                Some(self.timeout),
            )
            .await
    }

    /// Send a `ping` and wait for the empty result.
    pub async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .request(
                METHOD_PING,
                serde_json::json!({}),
                Some(self.timeout.min(DEFAULT_REQUEST_TIMEOUT)),
            )
            .await?;
        Ok(())
    }
}
