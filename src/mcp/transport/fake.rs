//! In-process fake transport for tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. The transport goes into the code under test; the handle lets the
//! test read what the client sent, inject server messages and observe how
//! often the transport was closed.
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx ----------------->   inbound_rx  (client receive())
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{HostError, Result};
use crate::mcp::transport::Transport;

/// In-process fake transport.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    close_calls: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
    protocol_version: Arc<std::sync::Mutex<Option<String>>>,
    close_log: Option<(String, CloseLog)>,
}

/// Shared record of which transports were closed, in order.
pub type CloseLog = Arc<std::sync::Mutex<Vec<String>>>;

/// Test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Messages the client sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Messages pushed here come out of the client's [`Transport::receive`].
    pub inbound_tx: mpsc::UnboundedSender<String>,
    close_calls: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
    protocol_version: Arc<std::sync::Mutex<Option<String>>>,
}

impl FakeTransport {
    /// Create a connected transport/handle pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let close_calls = Arc::new(AtomicUsize::new(0));
        let fail_sends = Arc::new(AtomicBool::new(false));
        let protocol_version = Arc::new(std::sync::Mutex::new(None));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            close_calls: Arc::clone(&close_calls),
            fail_sends: Arc::clone(&fail_sends),
            protocol_version: Arc::clone(&protocol_version),
            close_log: None,
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            close_calls,
            fail_sends,
            protocol_version,
        };
        (transport, handle)
    }

    /// Append `name` to `log` on the first `close` call.
    pub fn log_closes_to(mut self, name: impl Into<String>, log: CloseLog) -> Self {
        self.close_log = Some((name.into(), log));
        self
    }
}

impl FakeTransportHandle {
    /// Number of times `close` was called on the transport.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Make every later `send` fail as if the connection dropped.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Revision passed to [`Transport::set_protocol_version`], if any.
    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version.lock().ok().and_then(|g| g.clone())
    }

    /// Shared close counter, for tests that hand the handle to a task.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_calls)
    }

    /// Shared protocol version slot, for tests that hand the handle to a task.
    pub fn protocol_version_slot(&self) -> Arc<std::sync::Mutex<Option<String>>> {
        Arc::clone(&self.protocol_version)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) || self.close_calls.load(Ordering::SeqCst) > 0 {
            return Err(HostError::McpTransport("fake transport: connection lost".into()).into());
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| HostError::McpTransport("fake transport: handle dropped".into()).into())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    async fn close(&self) -> Result<()> {
        let previous = self.close_calls.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            if let Some((name, log)) = &self.close_log {
                if let Ok(mut guard) = log.lock() {
                    guard.push(name.clone());
                }
            }
        }
        Ok(())
    }

    fn set_protocol_version(&self, version: &str) {
        if let Ok(mut guard) = self.protocol_version.lock() {
            *guard = Some(version.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_reaches_handle_and_inbound_reaches_receive() {
        let (transport, mut handle) = FakeTransport::new();

        transport.send("{\"id\":1}".to_string()).await.unwrap();
        assert_eq!(handle.outbound_rx.recv().await.unwrap(), "{\"id\":1}");

        handle.inbound_tx.send("{\"id\":1,\"result\":{}}".to_string()).unwrap();
        let received = transport.receive().next().await.unwrap();
        assert!(received.contains("result"));
    }

    #[tokio::test]
    async fn test_close_is_counted_and_blocks_sends() {
        let (transport, handle) = FakeTransport::new();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(handle.close_calls(), 2);
        assert!(transport.send("{}".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_log_records_first_close_only() {
        let log: CloseLog = Arc::default();
        let (transport, _handle) = FakeTransport::new();
        let transport = transport.log_closes_to("alpha", Arc::clone(&log));
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_sends_switch() {
        let (transport, handle) = FakeTransport::new();
        handle.fail_sends();
        assert!(transport.send("{}".to_string()).await.is_err());
    }
}
