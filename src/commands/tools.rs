//! `tools` subcommand handler
//!
//! Connects to every configured server, prints the merged namespace and
//! closes the sessions again.

use super::InterruptGuard;
use crate::config::Config;
use crate::error::Result;
use crate::host::{close_sessions, open_servers, ToolNamespace};
use crate::mcp::transport::TransportConnector;
use colored::Colorize;
use prettytable::{format, Table};
use serde_json::{json, Value};

const DESCRIPTION_WIDTH: usize = 60;

/// Handle the `tools` command
///
/// # Arguments
///
/// * `config` - Application configuration
/// * `as_json` - Print JSON instead of a table
///
/// # Errors
///
/// Returns error if no servers are configured or one cannot be opened.
pub async fn handle_tools(config: Config, as_json: bool) -> Result<()> {
    config.require_servers()?;

    let interrupt = InterruptGuard::arm();
    let (sessions, namespace) =
        open_servers(&config.servers, &TransportConnector, interrupt.token()).await?;
    close_sessions(&sessions).await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&namespace_json(&namespace))?);
        return Ok(());
    }

    if namespace.tool_count() == 0 {
        println!("{}", "No tools advertised by the configured servers.".yellow());
        return Ok(());
    }

    println!("\nTool namespace:");
    namespace_table(&namespace).printstd();
    println!();
    for conflict in namespace.conflicts() {
        println!(
            "{}",
            format!(
                "`{}` is provided by {}; calls go to `{}`",
                conflict.tool,
                conflict.servers.join(", "),
                conflict.winner()
            )
            .yellow()
        );
    }
    Ok(())
}

/// Namespace as JSON: servers in configuration order plus conflicts
pub fn namespace_json(namespace: &ToolNamespace) -> Value {
    let servers: Vec<Value> = namespace
        .iter()
        .map(|(server, tools)| {
            json!({
                "name": server,
                "tools": tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameter_schema,
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    let conflicts: Vec<Value> = namespace
        .conflicts()
        .iter()
        .map(|c| json!({ "tool": c.tool, "servers": c.servers, "winner": c.winner() }))
        .collect();

    json!({ "servers": servers, "conflicts": conflicts })
}

/// One row per advertised tool; shadowed duplicates are marked
pub fn namespace_table(namespace: &ToolNamespace) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "Server".bold(),
        "Tool".bold(),
        "Description".bold(),
        "Note".bold()
    ]);

    for (server, tools) in namespace.iter() {
        for tool in tools {
            let note = match namespace.route(&tool.name) {
                Some(owner) if owner != server => format!("shadowed by {}", owner),
                _ => String::new(),
            };
            table.add_row(prettytable::row![
                server.cyan(),
                tool.name,
                truncate(&tool.description, DESCRIPTION_WIDTH),
                note.yellow()
            ]);
        }
    }

    table
}

pub(crate) fn truncate(text: &str, width: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= width {
        return single_line;
    }
    let kept: String = single_line.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}
