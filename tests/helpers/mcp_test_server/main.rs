//! MCP test server binary for integration tests
//!
//! A minimal MCP server speaking newline-delimited JSON-RPC over
//! stdin/stdout. Integration tests launch it through the stdio transport.
//!
//! # Handled Methods
//!
//! - `initialize` -- answers with protocol version `2025-03-26` unless
//!   `MCP_TEST_PROTOCOL_VERSION` is set.
//! - `notifications/initialized` -- swallowed.
//! - `tools/list` -- four tools, two per page (`nextCursor` pagination).
//! - `tools/call`:
//!   - `echo` returns `arguments.message` as text
//!   - `add` returns `a + b` as text
//!   - `pixel` returns a one-pixel PNG image item
//!   - `sound` returns an audio item
//!   - anything else is a `-32602` error
//! - `ping` -- empty result.
//! - All other methods -- `-32601 Method not found`.
//!
//! One line is written to stderr at startup so stderr capture can be
//! observed.

use serde_json::{json, Value};
use std::io::{self, BufRead, Write};

const PAGE_SIZE: usize = 2;
const PIXEL_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

fn main() {
    eprintln!("mcp_test_server: ready");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&Value::Null, -32700, "Parse error");
                if !write_line(&mut out, &response) {
                    break;
                }
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let id = request.get("id").cloned().unwrap_or(Value::Null);

        // Notifications carry no id and get no response.
        if request.get("id").is_none() {
            continue;
        }

        let response = match method {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id, &request),
            "tools/call" => handle_tools_call(&id, &request),
            "ping" => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if !write_line(&mut out, &response) {
            break;
        }
    }
}

fn write_line(out: &mut impl Write, value: &Value) -> bool {
    let serialized = match serde_json::to_string(value) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("mcp_test_server: failed to serialize response: {}", e);
            return true;
        }
    };
    writeln!(out, "{}", serialized).is_ok() && out.flush().is_ok()
}

fn handle_initialize(id: &Value) -> Value {
    let version =
        std::env::var("MCP_TEST_PROTOCOL_VERSION").unwrap_or_else(|_| "2025-03-26".to_string());
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": "mcp-test-server", "version": "0.1.0" }
        }
    })
}

fn all_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "echo",
            "description": "Echoes input",
            "inputSchema": {
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            }
        }),
        json!({
            "name": "add",
            "description": "Adds two numbers",
            "inputSchema": {
                "type": "object",
                "properties": { "a": { "type": "number" }, "b": { "type": "number" } }
            }
        }),
        json!({
            "name": "pixel",
            "title": "One pixel image",
            "inputSchema": { "type": "object" }
        }),
        json!({
            "name": "sound",
            "description": "Returns audio",
            "inputSchema": { "type": "object" }
        }),
    ]
}

fn handle_tools_list(id: &Value, request: &Value) -> Value {
    let start = request
        .pointer("/params/cursor")
        .and_then(|c| c.as_str())
        .and_then(|c| c.parse::<usize>().ok())
        .unwrap_or(0);

    let tools = all_tools();
    let end = (start + PAGE_SIZE).min(tools.len());
    let page: Vec<Value> = tools[start.min(end)..end].to_vec();

    let mut result = json!({ "tools": page });
    if end < tools.len() {
        result["nextCursor"] = json!(end.to_string());
    }
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn handle_tools_call(id: &Value, request: &Value) -> Value {
    let params = request.get("params").unwrap_or(&Value::Null);
    let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    let content = match tool_name {
        "echo" => {
            let message = arguments
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("");
            json!([{ "type": "text", "text": message }])
        }
        "add" => {
            let a = arguments.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let b = arguments.get("b").and_then(|v| v.as_f64()).unwrap_or(0.0);
            json!([{ "type": "text", "text": format!("{}", a + b) }])
        }
        "pixel" => json!([{ "type": "image", "data": PIXEL_PNG, "mimeType": "image/png" }]),
        "sound" => json!([{ "type": "audio", "data": "AAAA", "mimeType": "audio/wav" }]),
        _ => return make_error(id, -32602, &format!("Unknown tool: {}", tool_name)),
    };

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": { "content": content, "isError": false }
    })
}

fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
