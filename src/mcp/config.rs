//! Tool server configuration
//!
//! A [`ServerDescriptor`] says how to reach one MCP server. Servers are kept
//! in a [`ServerMap`], which preserves the order in which they appear in the
//! configuration document because that order decides tool routing.
//!
//! # Example (YAML)
//!
//! ```yaml
//! servers:
//!   files:
//!     command: npx
//!     args: ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
//!   search:
//!     transport: streamable_http
//!     url: http://localhost:9999/mcp
//!     headers:
//!       Authorization: Bearer abc
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How the host reaches a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Spawned child process speaking over stdin/stdout.
    #[default]
    Stdio,
    /// Legacy server-push event stream plus POST endpoint.
    Sse,
    /// Single streamable HTTP endpoint.
    StreamableHttp,
}

/// Connection parameters for one tool server. Immutable after load.
///
/// Which fields are required depends on [`TransportKind`]; missing fields are
/// reported as connection errors when the server is opened, not at parse
/// time, so one bad entry names the server it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Transport mechanism; `stdio` when omitted.
    #[serde(default)]
    pub transport: TransportKind,

    /// Executable to spawn (stdio).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for `command` (stdio).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Extra environment for the child process (stdio).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,

    /// Working directory for the child process (stdio).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Server URL (sse, streamable_http).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<url::Url>,

    /// Headers added to every HTTP request (sse, streamable_http).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Per-request timeout, also used for connect and handshake.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Default for ServerDescriptor {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            command: None,
            args: None,
            env: None,
            cwd: None,
            url: None,
            headers: HashMap::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Server name -> descriptor, in configuration order.
///
/// # Examples
///
/// ```
/// use mcphost::mcp::config::ServerMap;
///
/// let servers: ServerMap = serde_json::from_str(
///     r#"{"zeta": {"command": "z", "args": []}, "alpha": {"command": "a", "args": []}}"#,
/// ).unwrap();
/// let names: Vec<&str> = servers.names().collect();
/// assert_eq!(names, vec!["zeta", "alpha"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMap {
    entries: Vec<(String, ServerDescriptor)>,
}

impl ServerMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a server; a name that is already present is replaced in place.
    pub fn insert(&mut self, name: impl Into<String>, descriptor: ServerDescriptor) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = descriptor,
            None => self.entries.push((name, descriptor)),
        }
    }

    /// Look up a server by name.
    pub fn get(&self, name: &str) -> Option<&ServerDescriptor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    /// Iterate in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServerDescriptor)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Server names in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Number of servers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no servers are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ServerDescriptor)> for ServerMap {
    fn from_iter<I: IntoIterator<Item = (String, ServerDescriptor)>>(iter: I) -> Self {
        let mut map = ServerMap::new();
        for (name, descriptor) in iter {
            map.insert(name, descriptor);
        }
        map
    }
}

impl Serialize for ServerMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, descriptor) in &self.entries {
            map.serialize_entry(name, descriptor)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ServerMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = ServerMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of server name to server descriptor")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<ServerMap, E> {
                Ok(ServerMap::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ServerMap, A::Error> {
                let mut entries: Vec<(String, ServerDescriptor)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, descriptor)) =
                    access.next_entry::<String, ServerDescriptor>()?
                {
                    if entries.iter().any(|(n, _)| *n == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate server name `{}`",
                            name
                        )));
                    }
                    entries.push((name, descriptor));
                }
                Ok(ServerMap { entries })
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}
