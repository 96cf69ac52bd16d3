//! Merged tool namespace
//!
//! Server name -> ordered tool list, in configuration order. Routing scans
//! servers in that order and picks the first one that lists the tool, so a
//! duplicated name always resolves to the earliest server.

use crate::providers::ToolDescriptor;
use serde::Serialize;
use std::collections::HashSet;

/// A tool name exposed by more than one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolConflict {
    /// The duplicated tool name
    pub tool: String,
    /// Servers listing it, in configuration order; the first one wins
    pub servers: Vec<String>,
}

impl ToolConflict {
    /// Server that calls to this tool are routed to
    pub fn winner(&self) -> &str {
        self.servers.first().map(String::as_str).unwrap_or_default()
    }
}

/// Ordered mapping of server name to the tools captured at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolNamespace {
    entries: Vec<(String, Vec<ToolDescriptor>)>,
}

impl ToolNamespace {
    /// Empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a server's tool list after the servers already present.
    pub fn push(&mut self, server: impl Into<String>, tools: Vec<ToolDescriptor>) {
        self.entries.push((server.into(), tools));
    }

    /// Server that owns `tool`: the first in configuration order listing it.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::host::ToolNamespace;
    /// use mcphost::providers::ToolDescriptor;
    ///
    /// let tool = |name: &str| ToolDescriptor {
    ///     name: name.to_string(),
    ///     description: String::new(),
    ///     parameter_schema: serde_json::json!({"type": "object"}),
    /// };
    /// let mut namespace = ToolNamespace::new();
    /// namespace.push("a", vec![tool("search")]);
    /// namespace.push("b", vec![tool("search"), tool("fetch")]);
    ///
    /// assert_eq!(namespace.route("search"), Some("a"));
    /// assert_eq!(namespace.route("fetch"), Some("b"));
    /// assert_eq!(namespace.route("missing"), None);
    /// ```
    pub fn route(&self, tool: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, tools)| tools.iter().any(|t| t.name == tool))
            .map(|(server, _)| server.as_str())
    }

    /// Tools for the completion endpoint, in server then advertised order.
    ///
    /// A duplicated name appears once, with the descriptor of the server it
    /// routes to.
    pub fn flatten(&self) -> Vec<ToolDescriptor> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .flat_map(|(_, tools)| tools.iter())
            .filter(|t| seen.insert(t.name.as_str()))
            .cloned()
            .collect()
    }

    /// Every tool name listed by more than one server, in first-seen order.
    pub fn conflicts(&self) -> Vec<ToolConflict> {
        let mut conflicts: Vec<ToolConflict> = Vec::new();
        for (server, tools) in &self.entries {
            for tool in tools {
                let owner = self.route(&tool.name).unwrap_or_default();
                if owner == server {
                    continue;
                }
                match conflicts.iter_mut().find(|c| c.tool == tool.name) {
                    Some(conflict) => {
                        if !conflict.servers.contains(server) {
                            conflict.servers.push(server.clone());
                        }
                    }
                    None => conflicts.push(ToolConflict {
                        tool: tool.name.clone(),
                        servers: vec![owner.to_string(), server.clone()],
                    }),
                }
            }
        }
        conflicts
    }

    /// Servers and their tools in configuration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ToolDescriptor])> {
        self.entries
            .iter()
            .map(|(server, tools)| (server.as_str(), tools.as_slice()))
    }

    /// Tools captured for `server`
    pub fn tools_for(&self, server: &str) -> Option<&[ToolDescriptor]> {
        self.entries
            .iter()
            .find(|(name, _)| name == server)
            .map(|(_, tools)| tools.as_slice())
    }

    /// Number of distinct tool names
    pub fn tool_count(&self) -> usize {
        self.flatten().len()
    }

    /// Number of servers
    pub fn server_count(&self) -> usize {
        self.entries.len()
    }
}
