//! mcphost - connect a chat model to MCP tool servers
//!
#![doc = "Main entry point for the mcphost application."]

use anyhow::Result;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcphost::cli::{Cli, Commands};
use mcphost::commands;
use mcphost::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Chat => {
            commands::chat::run_chat(config).await?;
            Ok(())
        }
        Commands::Run { prompt } => {
            tracing::debug!("Using prompt: {}", prompt);
            commands::r#run::run_prompt(config, prompt).await?;
            Ok(())
        }
        Commands::Tools { json } => {
            commands::tools::handle_tools(config, json).await?;
            Ok(())
        }
        Commands::Session { command } => {
            commands::session::handle_session(command, &config)?;
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout stays clean for answers and JSON output.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "mcphost=debug" } else { "mcphost=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
