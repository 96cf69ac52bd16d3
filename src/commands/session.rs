use crate::cli::SessionCommand;
use crate::config::Config;
use crate::error::Result;
use crate::providers::{base::ROLE_ASSISTANT, Message};
use crate::storage::SessionStore;
use chrono::{DateTime, Local};
use colored::Colorize;
use prettytable::{format, Table};

const CONTENT_WIDTH: usize = 72;

/// Handle session commands
pub fn handle_session(command: SessionCommand, config: &Config) -> Result<()> {
    let store = SessionStore::from_config(&config.host)?;

    match command {
        SessionCommand::Show { json } => {
            let messages = store.load()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
                return Ok(());
            }

            if messages.is_empty() {
                println!(
                    "{}",
                    format!("Session `{}` has no stored messages.", store.name()).yellow()
                );
                return Ok(());
            }

            println!(
                "\nSession {} ({} messages, last updated {})",
                store.name().cyan(),
                messages.len(),
                last_updated(&store).unwrap_or_else(|| "-".to_string())
            );
            println!("{}", store.path().display());
            messages_table(&messages).printstd();
            println!();
        }
        SessionCommand::Clear => {
            if store.clear()? {
                println!("{}", format!("Cleared session `{}`", store.name()).green());
            } else {
                println!(
                    "{}",
                    format!("Session `{}` was already empty", store.name()).yellow()
                );
            }
        }
    }

    Ok(())
}

fn last_updated(store: &SessionStore) -> Option<String> {
    let modified = std::fs::metadata(store.path()).ok()?.modified().ok()?;
    let modified: DateTime<Local> = modified.into();
    Some(modified.format("%Y-%m-%d %H:%M").to_string())
}

fn messages_table(messages: &[Message]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row!["#".bold(), "Role".bold(), "Content".bold()]);
    for (index, message) in messages.iter().enumerate() {
        table.add_row(prettytable::row![
            index + 1,
            message.role.cyan(),
            summarize(message)
        ]);
    }
    table
}

/// One-line summary of a stored message
fn summarize(message: &Message) -> String {
    let mut parts = Vec::new();
    if let Some(content) = &message.content {
        let text = content.as_display_text();
        if !text.is_empty() {
            parts.push(super::tools::truncate(&text, CONTENT_WIDTH));
        }
    }
    if message.role == ROLE_ASSISTANT {
        for call in message.requested_tool_calls() {
            parts.push(format!(
                "-> {}({})",
                call.function.name,
                super::tools::truncate(&call.function.arguments, 40)
            ));
        }
    }
    if let Some(id) = &message.tool_call_id {
        parts.insert(0, format!("[{}]", id));
    }
    parts.join(" ")
}
