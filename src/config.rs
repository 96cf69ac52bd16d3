//! Configuration management for mcphost
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! Precedence, lowest first: built-in defaults, the YAML file, environment
//! variables (a `.env` file in the working directory is read first), CLI
//! flags.

use crate::error::{HostError, Result};
use crate::mcp::config::ServerMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for mcphost
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion endpoint configuration
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Host loop and session configuration
    #[serde(default)]
    pub host: HostConfig,
    /// Tool servers in routing order
    #[serde(default)]
    pub servers: ServerMap,
}

/// OpenAI-compatible completion endpoint configuration
///
/// When `api_version` is set the Azure deployment URL layout is used,
/// otherwise the plain `/chat/completions` layout with bearer auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the endpoint
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API key; usually supplied through `OPENAI_API_KEY`
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Azure API version (enables Azure mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Azure deployment id, or the model name in plain mode
    #[serde(default = "default_deployment")]
    pub deployment: String,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,

    /// Optional sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_deployment() -> String {
    "gpt-4o".to_string()
}

fn default_provider_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            api_version: None,
            deployment: default_deployment(),
            timeout_seconds: default_provider_timeout(),
            temperature: None,
        }
    }
}

/// How duplicate tool names across servers are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolConflictPolicy {
    /// The first server in configuration order wins
    #[default]
    FirstMatch,
    /// Refuse to start
    Reject,
}

/// Host loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Session name; the session file is `<session_dir>/<session_name>.json`
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Directory for session files; see [`HostConfig::resolved_session_dir`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_dir: Option<PathBuf>,

    /// Completion calls allowed per turn; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<usize>,

    /// Duplicate tool handling
    #[serde(default)]
    pub tool_conflicts: ToolConflictPolicy,

    /// Optional system prompt placed before a new session's first message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_session_name() -> String {
    "host".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            session_name: default_session_name(),
            session_dir: None,
            max_turns: None,
            tool_conflicts: ToolConflictPolicy::default(),
            system_prompt: None,
        }
    }
}

impl HostConfig {
    /// Session directory to use.
    ///
    /// An explicit `session_dir` wins. Otherwise `./sessions` is used when it
    /// already exists, and the platform data directory
    /// (`.../mcphost/sessions`) when it does not.
    pub fn resolved_session_dir(&self) -> PathBuf {
        if let Some(dir) = &self.session_dir {
            return dir.clone();
        }
        let local = PathBuf::from("sessions");
        if local.is_dir() {
            return local;
        }
        directories::ProjectDirs::from("dev", "mcphost", "mcphost")
            .map(|dirs| dirs.data_dir().join("sessions"))
            .unwrap_or(local)
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if a file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to load .env file: {}", e);
            }
        }

        config.apply_env_vars();
        config.apply_cli_overrides(cli)?;

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HostError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| HostError::Config(format!("Failed to parse config: {}", e)).into())
    }

    /// Read a standalone server map (the `servers` section on its own).
    ///
    /// JSON files parse as well, since YAML is a superset of JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Config`] if the file cannot be read or parsed.
    pub fn load_servers(path: &Path) -> Result<ServerMap> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            HostError::Config(format!(
                "Failed to read servers file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_yaml::from_str(&contents).map_err(|e| {
            HostError::Config(format!(
                "Failed to parse servers file {}: {}",
                path.display(),
                e
            ))
            .into()
        })
    }

    fn apply_env_vars(&mut self) {
        // Provider overrides
        if let Ok(api_base) = std::env::var("OPENAI_API_BASE") {
            self.provider.api_base = api_base;
        }

        if let Ok(api_version) = std::env::var("OPENAI_API_VERSION") {
            self.provider.api_version = Some(api_version).filter(|v| !v.is_empty());
        }

        if let Ok(deployment) = std::env::var("OPENAI_DEPLOYMENT_ID") {
            self.provider.deployment = deployment;
        }

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            self.provider.api_key = Some(api_key);
        }

        // Host overrides
        if let Ok(name) = std::env::var("MCPHOST_SESSION_NAME") {
            self.host.session_name = name;
        }

        if let Ok(dir) = std::env::var("MCPHOST_SESSION_DIR") {
            self.host.session_dir = Some(PathBuf::from(dir));
        }

        if let Ok(max_turns) = std::env::var("MCPHOST_MAX_TURNS") {
            if let Ok(value) = max_turns.parse() {
                self.host.max_turns = Some(value);
            } else {
                tracing::warn!("Invalid MCPHOST_MAX_TURNS: {}", max_turns);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) -> Result<()> {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(path) = &cli.servers {
            self.servers = Self::load_servers(path)?;
            tracing::debug!("Loaded {} servers from {}", self.servers.len(), path.display());
        }

        if let Some(session) = &cli.session {
            self.host.session_name = session.clone();
        }

        if let Some(dir) = &cli.session_dir {
            self.host.session_dir = Some(dir.clone());
        }

        if let Some(max_turns) = cli.max_turns {
            self.host.max_turns = Some(max_turns);
        }

        if cli.strict_tools {
            self.host.tool_conflicts = ToolConflictPolicy::Reject;
        }

        Ok(())
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are within acceptable ranges
    /// and that required fields are properly set.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Config`] if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let name = self.host.session_name.trim();
        if name.is_empty() {
            return Err(HostError::Config("session_name cannot be empty".to_string()).into());
        }

        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(HostError::Config(format!(
                "session_name must be a plain file name: {}",
                self.host.session_name
            ))
            .into());
        }

        if self.host.max_turns == Some(0) {
            return Err(HostError::Config("max_turns must be greater than 0".to_string()).into());
        }

        if self.provider.timeout_seconds == 0 {
            return Err(HostError::Config(
                "provider.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.provider.deployment.trim().is_empty() {
            return Err(
                HostError::Config("provider.deployment cannot be empty".to_string()).into(),
            );
        }

        for (name, descriptor) in self.servers.iter() {
            if descriptor.timeout_seconds == 0 {
                return Err(HostError::Config(format!(
                    "servers.{}.timeout_seconds must be greater than 0",
                    name
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Validate that at least one server is configured.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Config`] if the server map is empty
    pub fn require_servers(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(HostError::Config(
                "no tool servers configured; add a `servers` section or pass --servers"
                    .to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Path of the active session file
    pub fn session_path(&self) -> PathBuf {
        self.host
            .resolved_session_dir()
            .join(format!("{}.json", self.host.session_name))
    }
}
