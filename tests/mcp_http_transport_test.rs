//! Streamable HTTP transport integration tests
//!
//! Exercises `HttpTransport` against a `wiremock` server, first message by
//! message and then through a complete tool session opened with the
//! production connector.
//!
//! # wiremock body helpers
//!
//! Use `set_body_raw(bytes, mime)` for SSE responses so that the
//! `Content-Type` is set to `text/event-stream` exactly. `set_body_string`
//! forces `text/plain` and would cause the transport to fall through to the
//! JSON branch.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, header_exists, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use mcphost::error::HostError;
use mcphost::mcp::config::{ServerDescriptor, TransportKind};
use mcphost::mcp::session::ToolSession;
use mcphost::mcp::transport::http::HttpTransport;
use mcphost::mcp::transport::{Transport, TransportConnector};
use mcphost::providers::ContentItem;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const INITIALIZE: &str = r#""method":"initialize""#;

fn make_transport(base_url: &str) -> HttpTransport {
    HttpTransport::new(
        url::Url::parse(base_url).expect("valid url"),
        HashMap::new(),
        Duration::from_secs(5),
    )
    .expect("client builds")
}

/// Collect buffered messages until `deadline` passes without a new one.
async fn drain_receive(transport: &HttpTransport, deadline: Duration) -> Vec<String> {
    use futures::StreamExt;

    let mut messages = Vec::new();
    let mut stream = transport.receive();
    while let Ok(Some(msg)) = tokio::time::timeout(deadline, stream.next()).await {
        messages.push(msg);
    }
    messages
}

fn json_body(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/json")
}

/// Minimal MCP server: answers by method and echoes the request id.
struct McpResponder {
    session_id: &'static str,
}

impl Respond for McpResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(400);
        };
        let Some(id) = body.get("id").cloned() else {
            // notifications are acknowledged without a body
            return ResponseTemplate::new(202);
        };

        let result = match body["method"].as_str().unwrap_or("") {
            "initialize" => json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "http-mock", "version": "1.0"}
            }),
            "tools/list" => json!({
                "tools": [{
                    "name": "lookup",
                    "description": "Looks things up",
                    "inputSchema": {"type": "object"}
                }]
            }),
            "tools/call" => json!({
                "content": [{"type": "text", "text": format!("looked up {}", body["params"]["arguments"]["q"])}]
            }),
            other => {
                return json_body(
                    &json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": format!("unknown {}", other)}
                    })
                    .to_string(),
                )
            }
        };

        json_body(&json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
            .insert_header("Mcp-Session-Id", self.session_id)
    }
}

// ---------------------------------------------------------------------------
// Message-level behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_post_with_json_response_forwarded_to_receive() {
    let server = MockServer::start().await;
    let body = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;

    Mock::given(method("POST"))
        .respond_with(json_body(body))
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#.to_string())
        .await
        .expect("send should succeed");

    let messages = drain_receive(&transport, Duration::from_millis(200)).await;
    assert_eq!(messages, vec![body.to_string()]);
}

#[tokio::test]
async fn test_post_with_sse_reply_forwards_events_and_drops_pings() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        "event: ping\n",
        "data: {}\n",
        "\n",
        "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"first\":true}}\n",
        "\n",
        "data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"second\":true}}\n",
        "\n",
    );

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#.to_string())
        .await
        .expect("send should succeed");

    let messages = drain_receive(&transport, Duration::from_millis(300)).await;
    assert_eq!(messages.len(), 2, "got: {messages:?}");

    let first: Value = serde_json::from_str(&messages[0]).unwrap();
    let second: Value = serde_json::from_str(&messages[1]).unwrap();
    assert_eq!(first["result"]["first"], true);
    assert_eq!(second["result"]["second"], true);
}

#[tokio::test]
async fn test_post_202_yields_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
        .await
        .expect("send should succeed");

    let messages = drain_receive(&transport, Duration::from_millis(100)).await;
    assert!(messages.is_empty(), "got: {messages:?}");
}

#[tokio::test]
async fn test_protocol_version_header_only_after_negotiation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header_exists("MCP-Protocol-Version"))
        .and(body_string_contains(INITIALIZE))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("MCP-Protocol-Version", "2025-06-18"))
        .and(body_string_contains("ping"))
        .respond_with(json_body(r#"{"jsonrpc":"2.0","id":2,"result":{}}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(json_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#))
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#.to_string())
        .await
        .unwrap();

    transport.set_protocol_version("2025-06-18");
    transport
        .send(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#.to_string())
        .await
        .unwrap();

    server.verify().await;
}

#[tokio::test]
async fn test_session_id_captured_and_sent_on_subsequent_requests() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_string_contains("initialize"))
        .respond_with(
            json_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
                .insert_header("Mcp-Session-Id", "test-session-1"),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(header("Mcp-Session-Id", "test-session-1"))
        .and(body_string_contains("tools/list"))
        .respond_with(json_body(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#.to_string())
        .await
        .unwrap();
    assert_eq!(transport.session_id().await.as_deref(), Some("test-session-1"));

    transport
        .send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#.to_string())
        .await
        .unwrap();

    server.verify().await;
}

#[tokio::test]
async fn test_404_with_session_reports_expiry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_string_contains("initialize"))
        .respond_with(
            json_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
                .insert_header("Mcp-Session-Id", "session-abc"),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(header("Mcp-Session-Id", "session-abc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#.to_string())
        .await
        .unwrap();

    let err = transport
        .send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#.to_string())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("expired"), "unexpected error: {err}");
    assert_eq!(transport.session_id().await, None);
}

#[tokio::test]
async fn test_401_is_transport_error_with_body_on_error_stream() {
    use futures::StreamExt;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let transport = make_transport(&server.uri());
    let err = transport
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#.to_string())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HostError>(),
        Some(HostError::McpTransport(_))
    ));

    let mut errors = transport.receive_err();
    let line = tokio::time::timeout(Duration::from_millis(200), errors.next())
        .await
        .expect("error line")
        .expect("stream open");
    assert!(line.contains("401"));
    assert!(line.contains("bad token"));
}

#[tokio::test]
async fn test_configured_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(
        url::Url::parse(&server.uri()).unwrap(),
        HashMap::from([("Authorization".to_string(), "Bearer abc".to_string())]),
        Duration::from_secs(5),
    )
    .unwrap();
    transport
        .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_string())
        .await
        .unwrap();

    server.verify().await;
}

// ---------------------------------------------------------------------------
// Full tool session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_tool_session_over_streamable_http() {
    let server = MockServer::start().await;

    // The handshake goes out before a version is negotiated; every tool
    // request after it carries the negotiated one.
    Mock::given(method("POST"))
        .and(header_exists("MCP-Protocol-Version"))
        .and(body_string_contains(INITIALIZE))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    for tool_method in ["tools/list", "tools/call"] {
        Mock::given(method("POST"))
            .and(header("MCP-Protocol-Version", "2025-06-18"))
            .and(header("Mcp-Session-Id", "sess-42"))
            .and(body_string_contains(tool_method))
            .respond_with(McpResponder {
                session_id: "sess-42",
            })
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .respond_with(McpResponder {
            session_id: "sess-42",
        })
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(header("Mcp-Session-Id", "sess-42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let descriptor = ServerDescriptor {
        transport: TransportKind::StreamableHttp,
        url: Some(url::Url::parse(&format!("{}/mcp", server.uri())).unwrap()),
        timeout_seconds: 5,
        ..Default::default()
    };

    let session = ToolSession::open("remote", &descriptor, &TransportConnector)
        .await
        .expect("session opens");
    assert_eq!(session.protocol_version(), "2025-06-18");

    let tools = session.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup");

    let items = session.invoke("lookup", json!({"q": "rust"})).await.unwrap();
    assert_eq!(items, vec![ContentItem::text("looked up \"rust\"")]);

    session.close().await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn test_unreachable_http_server_is_connection_error() {
    // Nothing listens on this port once the mock server is dropped.
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };

    let descriptor = ServerDescriptor {
        transport: TransportKind::StreamableHttp,
        url: Some(url::Url::parse(&uri).unwrap()),
        timeout_seconds: 2,
        ..Default::default()
    };

    let err = ToolSession::open("offline", &descriptor, &TransportConnector)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HostError>(),
        Some(HostError::Connection { server, .. }) if server == "offline"
    ));
}
