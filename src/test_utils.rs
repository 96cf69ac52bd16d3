//! Test utilities for mcphost
//!
//! This module provides common test helpers: temporary files, error
//! assertions, a scripted MCP server that answers over a
//! [`FakeTransport`], a [`Connector`] handing out such servers, and a
//! scripted completion provider.

use crate::config::Config;
use crate::error::{HostError, Result};
use crate::mcp::config::ServerDescriptor;
use crate::mcp::transport::fake::{CloseLog, FakeTransport, FakeTransportHandle};
use crate::mcp::transport::{Connector, Transport};
use crate::mcp::types::LATEST_PROTOCOL_VERSION;
use crate::providers::{CompletionResponse, Message, Provider, ToolDescriptor};
use crate::storage::SessionStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Create a temporary directory for testing
///
/// # Panics
///
/// Panics if the directory cannot be created
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Create a test file with the given content
///
/// # Panics
///
/// Panics if file creation or writing fails
pub fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T>(result: Result<T>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = format!("{:#}", e);
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// Create a test configuration with default values
pub fn test_config() -> Config {
    Config::default()
}

/// Create a test configuration YAML string
pub fn test_config_yaml() -> String {
    r#"
provider:
  api_base: http://localhost:8080/v1
  deployment: test-model
  timeout_seconds: 30

host:
  session_name: test
  max_turns: 10
  tool_conflicts: first_match

servers:
  files:
    command: mcp-files
    args: ["--root", "/tmp"]
  search:
    transport: streamable_http
    url: http://localhost:9999/mcp
    timeout_seconds: 15
"#
    .to_string()
}

// ---------------------------------------------------------------------------
// Scripted MCP server
// ---------------------------------------------------------------------------

/// Behaviour of an in-process MCP server driven through a [`FakeTransport`]
///
/// By default it accepts the handshake with the latest protocol revision,
/// lists no tools, and answers every `tools/call` with one text item
/// `"<tool> ok"`.
#[derive(Debug, Clone)]
pub struct ScriptedMcpServer {
    tools: Vec<serde_json::Value>,
    results: HashMap<String, serde_json::Value>,
    protocol_version: String,
    fail_initialize: bool,
    page_size: Option<usize>,
}

impl Default for ScriptedMcpServer {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            results: HashMap::new(),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            fail_initialize: false,
            page_size: None,
        }
    }
}

impl ScriptedMcpServer {
    /// Server with default behaviour
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise a tool; an empty description is omitted on the wire
    pub fn with_tool(mut self, name: &str, description: &str) -> Self {
        let mut tool = serde_json::json!({
            "name": name,
            "inputSchema": {"type": "object", "properties": {}}
        });
        if !description.is_empty() {
            tool["description"] = serde_json::json!(description);
        }
        self.tools.push(tool);
        self
    }

    /// Raw `tools/call` result for `tool`
    pub fn with_result(mut self, tool: &str, result: serde_json::Value) -> Self {
        self.results.insert(tool.to_string(), result);
        self
    }

    /// Protocol revision returned by `initialize`
    pub fn with_protocol_version(mut self, version: &str) -> Self {
        self.protocol_version = version.to_string();
        self
    }

    /// Answer `initialize` with a JSON-RPC error
    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Split `tools/list` into pages of `size`
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    /// Serve `handle` on a background task until the transport side is
    /// dropped.
    pub fn spawn(self, handle: FakeTransportHandle) -> ScriptedServerProbe {
        let probe = ScriptedServerProbe {
            close_calls: handle.close_counter(),
            protocol_version: handle.protocol_version_slot(),
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let calls = Arc::clone(&probe.calls);

        tokio::spawn(async move {
            let mut handle = handle;
            while let Some(raw) = handle.outbound_rx.recv().await {
                let Ok(message) = serde_json::from_str::<serde_json::Value>(&raw) else {
                    continue;
                };
                let Some(id) = message.get("id").cloned() else {
                    continue;
                };
                let method = message["method"].as_str().unwrap_or_default();
                let params = message.get("params").cloned().unwrap_or_default();

                let reply = match method {
                    "initialize" if self.fail_initialize => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32602, "message": "unsupported client"}
                    }),
                    "initialize" => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "protocolVersion": self.protocol_version,
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "scripted", "version": "1.0.0"}
                        }
                    }),
                    "tools/list" => {
                        let start: usize = params["cursor"]
                            .as_str()
                            .and_then(|c| c.parse().ok())
                            .unwrap_or(0);
                        let size = self.page_size.unwrap_or(self.tools.len().max(1));
                        let end = (start + size).min(self.tools.len());
                        let mut result = serde_json::json!({"tools": self.tools[start..end]});
                        if end < self.tools.len() {
                            result["nextCursor"] = serde_json::json!(end.to_string());
                        }
                        serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
                    }
                    "tools/call" => {
                        let name = params["name"].as_str().unwrap_or_default().to_string();
                        let arguments = params.get("arguments").cloned().unwrap_or_default();
                        if let Ok(mut guard) = calls.lock() {
                            guard.push((name.clone(), arguments));
                        }
                        let result = self.results.get(&name).cloned().unwrap_or_else(|| {
                            serde_json::json!({
                                "content": [{"type": "text", "text": format!("{} ok", name)}]
                            })
                        });
                        serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
                    }
                    _ => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "Method not found"}
                    }),
                };

                if handle.inbound_tx.send(reply.to_string()).is_err() {
                    break;
                }
            }
        });

        probe
    }
}

/// What a [`ScriptedMcpServer`] observed
#[derive(Debug, Clone)]
pub struct ScriptedServerProbe {
    close_calls: Arc<AtomicUsize>,
    protocol_version: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl ScriptedServerProbe {
    /// Times the transport was closed
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Protocol revision the client recorded on the transport
    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version.lock().ok().and_then(|g| g.clone())
    }

    /// `(tool, arguments)` of every `tools/call`, in arrival order
    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Fake connector
// ---------------------------------------------------------------------------

/// [`Connector`] that serves scripted servers over fake transports
#[derive(Debug, Default)]
pub struct FakeConnector {
    scripts: HashMap<String, ScriptedMcpServer>,
    failing: HashSet<String>,
    probes: Mutex<HashMap<String, ScriptedServerProbe>>,
    opened: AtomicUsize,
    close_log: CloseLog,
}

impl FakeConnector {
    /// Connector where every server uses the default script
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `script` for server `name`
    pub fn with_server(mut self, name: &str, script: ScriptedMcpServer) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }

    /// Make connecting to `name` fail with a connection error
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Probe for the server opened under `name`
    pub fn probe(&self, name: &str) -> Option<ScriptedServerProbe> {
        self.probes.lock().ok().and_then(|g| g.get(name).cloned())
    }

    /// Number of successful connects
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Server names in the order their transports were first closed
    pub fn close_order(&self) -> Vec<String> {
        self.close_log.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        name: &str,
        _descriptor: &ServerDescriptor,
    ) -> Result<Arc<dyn Transport>> {
        if self.failing.contains(name) {
            return Err(HostError::Connection {
                server: name.to_string(),
                reason: "connection refused".to_string(),
            }
            .into());
        }

        let (transport, handle) = FakeTransport::new();
        let transport = transport.log_closes_to(name, Arc::clone(&self.close_log));
        let script = self.scripts.get(name).cloned().unwrap_or_default();
        let probe = script.spawn(handle);
        if let Ok(mut guard) = self.probes.lock() {
            guard.insert(name.to_string(), probe);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(transport))
    }
}

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

/// Completion provider that replays canned replies in order
///
/// Records every request. When the script runs out it fails with a
/// completion endpoint error, or never answers if built with
/// [`ScriptedProvider::then_hang`].
#[derive(Debug)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Message>>,
    requests: Mutex<Vec<Vec<Message>>>,
    tool_names: Mutex<Vec<Vec<String>>>,
    store_probe: Option<SessionStore>,
    snapshots: Mutex<Vec<Vec<Message>>>,
    hang_when_empty: bool,
}

impl ScriptedProvider {
    /// Provider replaying `replies`
    pub fn new(replies: Vec<Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            tool_names: Mutex::new(Vec::new()),
            store_probe: None,
            snapshots: Mutex::new(Vec::new()),
            hang_when_empty: false,
        }
    }

    /// Read `store` at every call so tests can compare it with the request
    pub fn with_store_probe(mut self, store: SessionStore) -> Self {
        self.store_probe = Some(store);
        self
    }

    /// Block forever once the replies are used up
    pub fn then_hang(mut self) -> Self {
        self.hang_when_empty = true;
        self
    }

    /// Number of `complete` calls
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|g| g.len()).unwrap_or_default()
    }

    /// Message histories received, one per call
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Tool names received, one list per call
    pub fn tool_names(&self) -> Vec<Vec<String>> {
        self.tool_names.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Stored session contents observed at each call
    pub fn store_snapshots(&self) -> Vec<Vec<Message>> {
        self.snapshots.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionResponse> {
        if let Some(store) = &self.store_probe {
            let snapshot = store.load()?;
            if let Ok(mut guard) = self.snapshots.lock() {
                guard.push(snapshot);
            }
        }
        if let Ok(mut guard) = self.requests.lock() {
            guard.push(messages.to_vec());
        }
        if let Ok(mut guard) = self.tool_names.lock() {
            guard.push(tools.iter().map(|t| t.name.clone()).collect());
        }

        let next = self.replies.lock().ok().and_then(|mut g| g.pop_front());
        match next {
            Some(message) => Ok(CompletionResponse::new(message)),
            None if self.hang_when_empty => {
                futures::future::pending::<()>().await;
                Err(HostError::CompletionEndpoint("unreachable".to_string()).into())
            }
            None => Err(HostError::CompletionEndpoint("script exhausted".to_string()).into()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_create_test_file() {
        let dir = temp_dir();
        let path = create_test_file(&dir, "test.txt", "content");
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "content");
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: Result<()> = Err(HostError::Config("test error message".to_string()).into());
        assert_error_contains(result, "test error");
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        let result: Result<()> = Ok(());
        assert_error_contains(result, "error");
    }

    #[test]
    fn test_test_config_yaml_parses_and_validates() {
        let config: Config = serde_yaml::from_str(&test_config_yaml()).unwrap();
        assert_eq!(config.host.session_name, "test");
        assert_eq!(config.servers.len(), 2);
        assert!(config.validate().is_ok());
        assert!(test_config().validate().is_ok());
    }

    #[tokio::test]
    async fn test_scripted_provider_replays_then_fails() {
        let provider = ScriptedProvider::new(vec![Message::assistant("one")]);
        let first = provider.complete(&[Message::user("q")], &[]).await.unwrap();
        assert_eq!(first.message, Message::assistant("one"));
        assert!(provider.complete(&[], &[]).await.is_err());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fake_connector_failing_server() {
        let connector = FakeConnector::new().failing("down");
        let result = connector
            .connect("down", &ServerDescriptor::default())
            .await;
        assert_error_contains(result.map(|_| ()), "connection refused");
        assert_eq!(connector.open_count(), 0);
    }
}
