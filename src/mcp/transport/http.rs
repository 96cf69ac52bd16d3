//! Streamable HTTP transport for MCP
//!
//! [`HttpTransport`] sends every outbound JSON-RPC message as an HTTP POST.
//! The server may reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- an SSE stream carrying one or more JSON-RPC
//!   messages
//! - `202 Accepted` -- an acknowledgement with no body (used for
//!   notifications and responses)
//!
//! # Session management
//!
//! The server MAY return an `Mcp-Session-Id` header on the `initialize`
//! response. The value is attached to every later request. A `404` while a
//! session is active means the server dropped the session; it is cleared and
//! the send fails.
//!
//! # Protocol version header
//!
//! `MCP-Protocol-Version` is sent on every request after the handshake has
//! negotiated a revision (see [`Transport::set_protocol_version`]).
//!
//! # Shutdown
//!
//! [`Transport::close`] sends `DELETE` with the session id. A transport that
//! is dropped without being closed falls back to a blocking DELETE on a
//! helper thread.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{HostError, Result};
use crate::mcp::transport::sse_parse::SseDecoder;
use crate::mcp::transport::Transport;

const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Streamable HTTP transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use mcphost::mcp::transport::http::HttpTransport;
///
/// # fn main() -> anyhow::Result<()> {
/// let transport = HttpTransport::new(
///     Url::parse("http://localhost:3000/mcp")?,
///     HashMap::new(),
///     Duration::from_secs(30),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    /// MCP endpoint URL (POST and DELETE target).
    endpoint: url::Url,
    /// Active session id, populated from the `initialize` response.
    session_id: Arc<RwLock<Option<String>>>,
    /// Negotiated protocol revision; `None` until the handshake completes.
    protocol_version: std::sync::RwLock<Option<String>>,
    /// Static extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
    response_tx: mpsc::UnboundedSender<String>,
    response_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    error_tx: mpsc::UnboundedSender<String>,
    error_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Stops SSE reply readers on close.
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`. No network I/O happens
    /// here; the first request is the `initialize` POST.
    ///
    /// `timeout` applies to each individual HTTP request.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::McpTransport`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostError::McpTransport(format!("failed to build HTTP client: {}", e)))?;

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        Ok(Self {
            http_client,
            endpoint,
            session_id: Arc::new(RwLock::new(None)),
            protocol_version: std::sync::RwLock::new(None),
            headers,
            response_tx,
            response_rx: Arc::new(tokio::sync::Mutex::new(response_rx)),
            error_tx,
            error_rx: Arc::new(tokio::sync::Mutex::new(error_rx)),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Session id assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Apply session, protocol-version and configured headers.
    async fn decorate(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, id);
        }
        let version = self
            .protocol_version
            .read()
            .ok()
            .and_then(|guard| guard.clone());
        if let Some(version) = version {
            req = req.header(PROTOCOL_VERSION_HEADER, version);
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    /// POST one JSON-RPC message and route the reply to `receive()`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::McpTransport`] if the request fails, the server
    /// answers with a non-success status, or the transport is closed.
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HostError::McpTransport("transport closed".into()).into());
        }

        let req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(message);
        let response = self
            .decorate(req)
            .await
            .send()
            .await
            .map_err(|e| HostError::McpTransport(format!("HTTP POST failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            let mut sid = self.session_id.write().await;
            if sid.take().is_some() {
                return Err(HostError::McpTransport("MCP session expired (HTTP 404)".into()).into());
            }
            return Err(HostError::McpTransport("HTTP 404 Not Found".into()).into());
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let _ = self
                .error_tx
                .send(format!("HTTP {}: {}", status, body.trim()));
            return Err(HostError::McpTransport(format!(
                "HTTP POST returned status {}",
                status
            ))
            .into());
        }

        if let Some(new_session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                tracing::debug!(session_id = %new_session_id, "MCP HTTP session established");
                *sid = Some(new_session_id);
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let byte_stream = response.bytes_stream();
            let response_tx = self.response_tx.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = forward_sse_messages(byte_stream, response_tx) => {}
                }
            });
        } else {
            let body = response.text().await.map_err(|e| {
                HostError::McpTransport(format!("failed to read response body: {}", e))
            })?;
            let body = body.trim();
            if !body.is_empty() {
                let _ = self.response_tx.send(body.to_string());
            }
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.response_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.error_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    /// Terminate the server session with `DELETE`. Servers that do not
    /// support explicit termination answer `405`, which is not an error.
    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();

        let Some(sid) = self.session_id.write().await.take() else {
            return Ok(());
        };

        let mut req = self
            .http_client
            .delete(self.endpoint.as_str())
            .header(SESSION_HEADER, sid.as_str());
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        match req.send().await {
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), "MCP HTTP session terminated");
            }
            Err(e) => {
                tracing::debug!("MCP HTTP session DELETE failed: {}", e);
            }
        }
        Ok(())
    }

    fn set_protocol_version(&self, version: &str) {
        if let Ok(mut guard) = self.protocol_version.write() {
            *guard = Some(version.to_string());
        }
    }
}

impl Drop for HttpTransport {
    /// Best-effort DELETE for a session that was never closed.
    fn drop(&mut self) {
        self.shutdown.cancel();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let session_id = match self.session_id.try_read() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };

        if let Some(sid) = session_id {
            let endpoint = self.endpoint.as_str().to_string();
            let mut extra_headers = self.headers.clone();
            extra_headers.insert(SESSION_HEADER.to_string(), sid);

            // A helper thread keeps the blocking client off the async runtime.
            let _ = std::thread::spawn(move || {
                if let Ok(client) = reqwest::blocking::Client::builder()
                    .timeout(Duration::from_secs(5))
                    .build()
                {
                    let mut req = client.delete(&endpoint);
                    for (k, v) in &extra_headers {
                        req = req.header(k.as_str(), v.as_str());
                    }
                    let _ = req.send();
                }
            });
        }
    }
}

/// Forward every non-ping `message` event of an SSE reply to `response_tx`.
pub(crate) async fn forward_sse_messages(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    response_tx: mpsc::UnboundedSender<String>,
) {
    use futures::StreamExt;

    let mut decoder = SseDecoder::default();
    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let Ok(chunk) = chunk else {
            break;
        };
        for event in decoder.push(&chunk) {
            if event.is_ping() || event.kind() != "message" || event.data.is_empty() {
                continue;
            }
            if response_tx.send(event.data).is_err() {
                return;
            }
        }
    }

    if let Some(event) = decoder.finish() {
        if !event.is_ping() && event.kind() == "message" && !event.data.is_empty() {
            let _ = response_tx.send(event.data);
        }
    }
}
