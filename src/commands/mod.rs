/*!
Command handlers for the CLI

This module provides the handlers invoked by the CLI entrypoint:

- `chat`: Interactive chat with the configured tool servers
- `run`: Execute a single prompt and print the answer
- `tools`: Print the merged tool namespace
- `session`: Inspect or clear the stored session

The handlers are thin; the work happens in [`crate::host::Host`].
*/

use crate::config::Config;
use crate::error::{HostError, Result};
use crate::host::Host;
use crate::mcp::transport::TransportConnector;
use crate::providers::{create_provider, Provider};
use crate::storage::SessionStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// Session inspection commands
pub mod session;

// Tool namespace listing
pub mod tools;

/// Cancels its token on the first Ctrl-C received while it is alive.
pub(crate) struct InterruptGuard {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl InterruptGuard {
    pub(crate) fn arm() -> Self {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received");
                trigger.cancel();
            }
        });
        Self { token, task }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Connect every configured server and build the host.
async fn start_host(config: &Config, cancel: &CancellationToken) -> Result<Host> {
    config.require_servers()?;
    let provider: Arc<dyn Provider> = create_provider(&config.provider)?.into();
    let store = SessionStore::from_config(&config.host)?;
    Host::start_with_cancel(
        &config.servers,
        &config.host,
        &TransportConnector,
        provider,
        store,
        cancel,
    )
    .await
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<HostError>(), Some(HostError::Cancelled))
}

// Chat command handler
pub mod chat {
    //! Interactive chat mode handler.
    //!
    //! Starts the host, then runs a readline loop that submits each line
    //! as a user message. Ctrl-C during a turn cancels that turn only;
    //! Ctrl-C or Ctrl-D at the prompt leaves.

    use super::*;
    use colored::Colorize;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Start interactive chat mode
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot start or the terminal cannot be
    /// initialized. Errors from individual turns are printed and the loop
    /// continues.
    pub async fn run_chat(config: Config) -> Result<()> {
        tracing::info!("Starting interactive chat mode");

        let mut host = {
            let interrupt = InterruptGuard::arm();
            start_host(&config, interrupt.token()).await?
        };

        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                host.shutdown().await;
                return Err(e.into());
            }
        };

        print_welcome_banner(&host);

        loop {
            match rl.readline(&format!("{} ", ">>".cyan().bold())) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if is_exit_command(trimmed) {
                        break;
                    }

                    if let Err(e) = rl.add_history_entry(trimmed) {
                        tracing::debug!("Failed to record history entry: {}", e);
                    }

                    let interrupt = InterruptGuard::arm();
                    match host.execute_with_cancel(trimmed, interrupt.token()).await {
                        Ok(answer) => {
                            println!("\n{}\n", answer);
                        }
                        Err(e) if is_cancelled(&e) => {
                            println!("{}", "\nTurn cancelled.\n".yellow());
                        }
                        Err(e) => {
                            eprintln!("{} {:#}\n", "Error:".red().bold(), e);
                        }
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    break;
                }
                Err(err) => {
                    eprintln!("{} {:?}", "Error:".red().bold(), err);
                    break;
                }
            }
        }

        println!("Goodbye!");
        host.shutdown().await;
        Ok(())
    }

    /// Whether a line asks to leave the chat
    pub(crate) fn is_exit_command(line: &str) -> bool {
        line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
    }

    fn print_welcome_banner(host: &Host) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                 mcphost interactive chat                     ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");
        println!("Session: {}", host.store().name().cyan());
        println!("Servers:");
        for (server, tools) in host.namespace().iter() {
            println!("  {} ({} tools)", server.green(), tools.len());
        }
        let conflicts = host.namespace().conflicts();
        if !conflicts.is_empty() {
            println!(
                "{}",
                format!(
                    "{} tool name(s) are shared between servers; run `mcphost tools` for details",
                    conflicts.len()
                )
                .yellow()
            );
        }
        println!("\nType 'exit' or 'quit' to leave, Ctrl-C cancels a running turn\n");
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_exit_commands_are_case_insensitive() {
            assert!(is_exit_command("exit"));
            assert!(is_exit_command("QUIT"));
            assert!(is_exit_command("Exit"));
            assert!(!is_exit_command("exit now"));
            assert!(!is_exit_command("hello"));
        }
    }
}

// Run command handler
pub mod r#run {
    //! One-shot prompt execution.

    use super::*;

    /// Send one prompt through the host and print the final answer
    ///
    /// The answer goes to stdout; logs go to stderr.
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot start or the turn fails.
    pub async fn run_prompt(config: Config, prompt: String) -> Result<()> {
        tracing::info!("Executing one-shot prompt");

        let interrupt = InterruptGuard::arm();
        let mut host = start_host(&config, interrupt.token()).await?;

        let outcome = host.execute_with_cancel(prompt, interrupt.token()).await;
        host.shutdown().await;

        let answer = outcome?;
        println!("{}", answer);
        Ok(())
    }
}
