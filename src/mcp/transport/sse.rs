//! Legacy HTTP+SSE transport for MCP (protocol revision `2024-11-05`)
//!
//! [`SseTransport`] opens a long-lived `GET` with `Accept: text/event-stream`.
//! The server's first `endpoint` event names the URL that client messages are
//! POSTed to; it is resolved against the stream URL and must share its
//! origin. Every later `message` event carries one JSON-RPC message.
//!
//! Replies to POSTs always arrive on the event stream, never in the POST
//! response body.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{HostError, Result};
use crate::mcp::transport::sse_parse::SseDecoder;
use crate::mcp::transport::Transport;

/// Legacy HTTP+SSE transport.
#[derive(Debug)]
pub struct SseTransport {
    http_client: reqwest::Client,
    /// URL announced by the `endpoint` event.
    post_url: url::Url,
    headers: HashMap<String, String>,
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    error_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Background task reading the event stream.
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` event.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::McpTransport`] if the GET fails, the server
    /// answers with a non-success status, the stream ends first, or no
    /// `endpoint` event arrives within `timeout`.
    pub async fn connect(
        url: url::Url,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        // No overall timeout: the GET body lives as long as the session.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| HostError::McpTransport(format!("failed to build HTTP client: {}", e)))?;
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostError::McpTransport(format!("failed to build HTTP client: {}", e)))?;

        let mut req = stream_client
            .get(url.as_str())
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = tokio::time::timeout(timeout, req.send())
            .await
            .map_err(|_| HostError::McpTransport(format!("timed out connecting to {}", url)))?
            .map_err(|e| HostError::McpTransport(format!("SSE GET failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HostError::McpTransport(format!("SSE GET returned HTTP {}", status)).into());
        }

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let byte_stream = response.bytes_stream();
        let reader = tokio::spawn(read_event_stream(
            byte_stream,
            endpoint_tx,
            response_tx,
            error_tx,
        ));

        let endpoint = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(HostError::McpTransport(
                    "event stream ended before an `endpoint` event".into(),
                )
                .into());
            }
            Err(_) => {
                reader.abort();
                return Err(HostError::McpTransport(format!(
                    "no `endpoint` event within {}s",
                    timeout.as_secs()
                ))
                .into());
            }
        };

        let post_url = match resolve_endpoint(&url, &endpoint) {
            Ok(post_url) => post_url,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };
        tracing::debug!(endpoint = %post_url, "SSE endpoint announced");

        Ok(Self {
            http_client,
            post_url,
            headers,
            response_rx: Arc::new(Mutex::new(response_rx)),
            error_rx: Arc::new(Mutex::new(error_rx)),
            reader: std::sync::Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        })
    }

    /// The URL client messages are POSTed to.
    pub fn post_url(&self) -> &url::Url {
        &self.post_url
    }

    fn abort_reader(&self) {
        if let Ok(mut guard) = self.reader.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// Resolve the announced endpoint against the stream URL and require the
/// same scheme, host and port.
fn resolve_endpoint(stream_url: &url::Url, announced: &str) -> Result<url::Url> {
    let resolved = stream_url.join(announced.trim()).map_err(|e| {
        HostError::McpTransport(format!("invalid endpoint `{}`: {}", announced, e))
    })?;
    if resolved.origin() != stream_url.origin() {
        return Err(HostError::McpTransport(format!(
            "endpoint origin does not match connection origin: {}",
            resolved
        ))
        .into());
    }
    Ok(resolved)
}

/// Drive the GET body: the first `endpoint` event goes to `endpoint_tx`,
/// `message` events go to `response_tx`.
async fn read_event_stream(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>>,
    endpoint_tx: oneshot::Sender<String>,
    response_tx: mpsc::UnboundedSender<String>,
    error_tx: mpsc::UnboundedSender<String>,
) {
    let mut decoder = SseDecoder::default();
    let mut endpoint_tx = Some(endpoint_tx);
    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = error_tx.send(format!("SSE stream error: {}", e));
                break;
            }
        };

        for event in decoder.push(&chunk) {
            if event.is_ping() {
                continue;
            }
            match event.kind() {
                "endpoint" => match endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(event.data);
                    }
                    None => tracing::debug!("ignoring repeated SSE endpoint event"),
                },
                "message" if !event.data.is_empty() => {
                    if response_tx.send(event.data).is_err() {
                        return;
                    }
                }
                other => tracing::debug!("ignoring SSE event `{}`", other),
            }
        }
    }

    tracing::debug!("SSE event stream closed");
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    /// POST one JSON-RPC message to the announced endpoint.
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HostError::McpTransport("transport closed".into()).into());
        }

        let mut req = self
            .http_client
            .post(self.post_url.as_str())
            .header("Content-Type", "application/json")
            .body(message);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| HostError::McpTransport(format!("HTTP POST failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HostError::McpTransport(format!(
                "HTTP POST returned status {}",
                status
            ))
            .into());
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

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.abort_reader();
        }
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.abort_reader();
    }
}
