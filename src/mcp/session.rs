//! Tool session: one negotiated MCP connection to one configured server
//!
//! A [`ToolSession`] owns its transport exclusively. Opening it wires three
//! background pumps between the transport and the JSON-RPC client:
//!
//! ```text
//! JsonRpcClient --outbound--> writer pump --> Transport::send
//! Transport::receive --> reader pump --inbound--> read loop --> JsonRpcClient
//! Transport::receive_err --> stderr pump --> tracing (debug)
//! ```
//!
//! All pumps and the read loop share one cancellation token that is fired by
//! [`ToolSession::close`] or when the session is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{HostError, Result};
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::config::ServerDescriptor;
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol};
use crate::mcp::transport::{Connector, Transport};
use crate::mcp::types::{
    CallToolResponse, ClientCapabilities, Implementation, McpTool, ToolResponseContent,
};
use crate::providers::{ContentItem, ToolDescriptor};

/// Server log notification.
const NOTIFICATION_MESSAGE: &str = "notifications/message";
/// Server tool list changed notification.
const NOTIFICATION_TOOLS_CHANGED: &str = "notifications/tools/list_changed";

/// A live, initialized session with one tool server.
#[derive(Debug)]
pub struct ToolSession {
    name: String,
    protocol: InitializedMcpProtocol,
    transport: Arc<dyn Transport>,
    cancellation: CancellationToken,
    /// Serializes invocations on this session.
    invoke_lock: Mutex<()>,
    closed: AtomicBool,
}

impl ToolSession {
    /// Connect to the server described by `descriptor` and complete the
    /// handshake.
    ///
    /// # Errors
    ///
    /// - [`HostError::Connection`] if the transport cannot be opened or the
    ///   handshake messages cannot be delivered.
    /// - [`HostError::Handshake`] if negotiation fails.
    pub async fn open(
        name: &str,
        descriptor: &ServerDescriptor,
        connector: &dyn Connector,
    ) -> Result<Self> {
        let transport = connector.connect(name, descriptor).await?;
        Self::open_with_transport(
            name,
            transport,
            Duration::from_secs(descriptor.timeout_seconds),
        )
        .await
    }

    /// Run the handshake over an already opened transport.
    ///
    /// On failure the transport is closed before the error is returned.
    pub async fn open_with_transport(
        name: &str,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Result<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let cancellation = CancellationToken::new();
        // Stops the pumps if this future is dropped before the handshake ends.
        let abandon_guard = cancellation.clone().drop_guard();

        let client = JsonRpcClient::new(outbound_tx).with_label(name);
        register_notification_handlers(&client, name).await;

        let loop_client = Arc::new(client.clone_shared());
        start_read_loop(inbound_rx, cancellation.clone(), Arc::clone(&loop_client));
        spawn_writer(
            Arc::clone(&transport),
            outbound_rx,
            loop_client,
            cancellation.clone(),
        );
        spawn_reader(Arc::clone(&transport), inbound_tx, cancellation.clone());
        spawn_stderr_logger(Arc::clone(&transport), name.to_string(), cancellation.clone());

        let handshake = McpProtocol::new(client, timeout)
            .initialize(Implementation::this_client(), ClientCapabilities::default())
            .await;

        let protocol = match handshake {
            Ok(protocol) => protocol,
            Err(e) => {
                cancellation.cancel();
                if let Err(close_err) = transport.close().await {
                    tracing::debug!(server = %name, "close after failed handshake: {}", close_err);
                }
                return Err(handshake_failure(name, e).into());
            }
        };

        abandon_guard.disarm();
        transport.set_protocol_version(protocol.protocol_version());
        if !protocol.advertises_tools() {
            tracing::debug!(server = %name, "server did not advertise the tools capability");
        }
        tracing::info!(
            server = %name,
            peer = %protocol.initialize_response.server_info.name,
            version = %protocol.protocol_version(),
            "tool session open"
        );

        Ok(Self {
            name: name.to_string(),
            protocol,
            transport,
            cancellation,
            invoke_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol revision negotiated with the server.
    pub fn protocol_version(&self) -> &str {
        self.protocol.protocol_version()
    }

    /// Name and version the server reported during the handshake.
    pub fn server_info(&self) -> &Implementation {
        &self.protocol.initialize_response.server_info
    }

    /// Fetch the server's tools in advertised order.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or any page request fails.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_open()?;
        let tools = self.protocol.list_tools().await?;
        tracing::debug!(server = %self.name, count = tools.len(), "listed tools");
        Ok(tools.into_iter().map(to_descriptor).collect())
    }

    /// Call `tool` with `arguments` and convert the result content.
    ///
    /// `Null` arguments are sent as an empty object. Invocations on one
    /// session never overlap.
    ///
    /// # Errors
    ///
    /// - [`HostError::UnsupportedContent`] if the result holds anything other
    ///   than text or images.
    /// - MCP request errors ([`HostError::McpTimeout`], [`HostError::Mcp`],
    ///   [`HostError::McpTransport`]).
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<Vec<ContentItem>> {
        self.ensure_open()?;
        let _guard = self.invoke_lock.lock().await;

        let arguments = match arguments {
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };

        tracing::debug!(server = %self.name, tool = %tool, "invoking tool");
        let response = self.protocol.call_tool(tool, Some(arguments)).await?;
        normalize_content(&self.name, tool, response)
    }

    /// Close the transport. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancellation.cancel();
        self.transport.close().await?;
        tracing::debug!(server = %self.name, "tool session closed");
        Ok(())
    }

    /// Whether [`ToolSession::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(HostError::McpTransport(format!(
                "tool session `{}` is closed",
                self.name
            ))
            .into());
        }
        Ok(())
    }
}

impl Drop for ToolSession {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

/// Turn a `tools/call` result into content items.
///
/// Text maps to [`ContentItem::Text`] and images to a `data:` URL. Every
/// other variant is rejected; nothing is dropped silently.
///
/// # Errors
///
/// Returns [`HostError::UnsupportedContent`] for the first item that cannot
/// be represented.
pub fn normalize_content(
    server: &str,
    tool: &str,
    response: CallToolResponse,
) -> Result<Vec<ContentItem>> {
    if response.is_error == Some(true) {
        tracing::warn!(server = %server, tool = %tool, "tool reported an error result");
    }

    response
        .content
        .into_iter()
        .map(|item| match item {
            ToolResponseContent::Text { text } => Ok(ContentItem::text(text)),
            ToolResponseContent::Image { data, mime_type } => Ok(ContentItem::image_url(
                format!("data:{};base64,{}", mime_type, data),
            )),
            other => Err(HostError::UnsupportedContent {
                server: server.to_string(),
                tool: tool.to_string(),
                kind: other.kind().to_string(),
            }
            .into()),
        })
        .collect()
}

fn to_descriptor(tool: McpTool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name,
        description: tool.description.or(tool.title).unwrap_or_default(),
        parameter_schema: tool.input_schema,
    }
}

/// Undeliverable handshake messages mean the server is unreachable; anything
/// else means it answered but negotiation failed.
fn handshake_failure(server: &str, error: anyhow::Error) -> HostError {
    match error.downcast_ref::<HostError>() {
        Some(HostError::McpTransport(reason)) => HostError::Connection {
            server: server.to_string(),
            reason: reason.clone(),
        },
        _ => HostError::Handshake {
            server: server.to_string(),
            reason: error.to_string(),
        },
    }
}

async fn register_notification_handlers(client: &JsonRpcClient, server: &str) {
    let name = server.to_string();
    client
        .on_notification(NOTIFICATION_MESSAGE, move |params| {
            let level = params
                .get("level")
                .and_then(|l| l.as_str())
                .unwrap_or("info");
            let data = params.get("data").cloned().unwrap_or_default();
            match level {
                "debug" => tracing::debug!(server = %name, "server log: {}", data),
                "info" | "notice" => tracing::info!(server = %name, "server log: {}", data),
                "warning" => tracing::warn!(server = %name, "server log: {}", data),
                _ => tracing::error!(server = %name, level = %level, "server log: {}", data),
            }
        })
        .await;

    let name = server.to_string();
    client
        .on_notification(NOTIFICATION_TOOLS_CHANGED, move |_| {
            tracing::info!(
                server = %name,
                "server reported a changed tool list; keeping the list captured at startup"
            );
        })
        .await;
}

fn spawn_writer(
    transport: Arc<dyn Transport>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    client: Arc<JsonRpcClient>,
    cancellation: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                maybe_msg = outbound_rx.recv() => {
                    let Some(message) = maybe_msg else { break };
                    if let Err(e) = transport.send(message.clone()).await {
                        tracing::warn!(server = %client.label(), "failed to send MCP message: {}", e);
                        client.fail_undelivered(&message, &e.to_string()).await;
                    }
                }
            }
        }
    });
}

fn spawn_reader(
    transport: Arc<dyn Transport>,
    inbound_tx: mpsc::UnboundedSender<String>,
    cancellation: CancellationToken,
) {
    tokio::spawn(async move {
        let mut inbound = transport.receive();
        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                maybe_msg = inbound.next() => match maybe_msg {
                    Some(message) => {
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    });
}

fn spawn_stderr_logger(
    transport: Arc<dyn Transport>,
    server: String,
    cancellation: CancellationToken,
) {
    tokio::spawn(async move {
        let mut diagnostics = transport.receive_err();
        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => break,
                maybe_line = diagnostics.next() => match maybe_line {
                    Some(line) => tracing::debug!(server = %server, "{}", line),
                    None => break,
                }
            }
        }
    });
}
