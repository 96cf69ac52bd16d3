//! Host orchestrator with the model-driven tool-calling loop
//!
//! The host:
//! - Opens one tool session per configured server, in configuration order
//! - Merges their tools into one namespace
//! - Runs the completion/tool loop for each user message
//! - Persists the session after every append
//! - Closes every session in reverse-open order on shutdown

use crate::config::{HostConfig, ToolConflictPolicy};
use crate::error::{HostError, Result};
use crate::host::namespace::ToolNamespace;
use crate::mcp::config::ServerMap;
use crate::mcp::session::ToolSession;
use crate::mcp::transport::Connector;
use crate::providers::{trim_unanswered_tool_calls, Message, Provider, ToolCall};
use crate::storage::SessionStore;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The orchestrator that owns the tool sessions and the conversation
///
/// # Examples
///
/// ```no_run
/// use mcphost::config::Config;
/// use mcphost::host::Host;
/// use mcphost::mcp::transport::TransportConnector;
/// use mcphost::providers::create_provider;
/// use mcphost::storage::SessionStore;
///
/// # async fn example() -> mcphost::error::Result<()> {
/// let config = Config::default();
/// let provider = create_provider(&config.provider)?;
/// let store = SessionStore::from_config(&config.host)?;
/// let mut host = Host::start(
///     &config.servers,
///     &config.host,
///     &TransportConnector,
///     provider.into(),
///     store,
/// )
/// .await?;
/// let answer = host.execute("What files are in /tmp?").await?;
/// println!("{}", answer);
/// host.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Host {
    provider: Arc<dyn Provider>,
    /// Sessions in open order (configuration order).
    sessions: Vec<ToolSession>,
    namespace: ToolNamespace,
    store: SessionStore,
    max_turns: Option<usize>,
    system_prompt: Option<String>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("provider", &self.provider.name())
            .field("servers", &self.server_names())
            .field("session", &self.store.name())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

impl Host {
    /// Open every configured server and capture its tools.
    ///
    /// # Errors
    ///
    /// - [`HostError::Connection`] / [`HostError::Handshake`] if a server
    ///   cannot be opened.
    /// - [`HostError::ToolNameConflict`] if `tool_conflicts` is `reject` and
    ///   two servers list the same tool.
    ///
    /// Every session opened before the failure is closed first.
    pub async fn start(
        servers: &ServerMap,
        config: &HostConfig,
        connector: &dyn Connector,
        provider: Arc<dyn Provider>,
        store: SessionStore,
    ) -> Result<Self> {
        Self::start_with_cancel(
            servers,
            config,
            connector,
            provider,
            store,
            &CancellationToken::new(),
        )
        .await
    }

    /// [`Host::start`] that gives up with [`HostError::Cancelled`] when
    /// `cancel` fires.
    pub async fn start_with_cancel(
        servers: &ServerMap,
        config: &HostConfig,
        connector: &dyn Connector,
        provider: Arc<dyn Provider>,
        store: SessionStore,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let (sessions, namespace) = open_servers(servers, connector, cancel).await?;

        let conflicts = namespace.conflicts();
        for conflict in &conflicts {
            warn!(
                tool = %conflict.tool,
                servers = %conflict.servers.join(", "),
                "tool provided by several servers; routing to `{}`",
                conflict.winner()
            );
        }
        if config.tool_conflicts == ToolConflictPolicy::Reject {
            if let Some(conflict) = conflicts.into_iter().next() {
                close_sessions(&sessions).await;
                return Err(HostError::ToolNameConflict {
                    tool: conflict.tool,
                    servers: conflict.servers,
                }
                .into());
            }
        }

        info!(
            servers = sessions.len(),
            tools = namespace.tool_count(),
            session = %store.name(),
            "host started"
        );

        Ok(Self {
            provider,
            sessions,
            namespace,
            store,
            max_turns: config.max_turns,
            system_prompt: config.system_prompt.clone(),
        })
    }

    /// Run one user message through the loop and return the final answer.
    ///
    /// # Errors
    ///
    /// - [`HostError::CompletionEndpoint`] if the endpoint fails.
    /// - [`HostError::MaxTurnsExceeded`] if the turn guard is reached.
    /// - [`HostError::Storage`] if the session cannot be read or written.
    ///
    /// Tool failures never surface here; they become tool messages.
    pub async fn execute(&mut self, message: impl Into<String>) -> Result<String> {
        self.execute_with_cancel(message, &CancellationToken::new())
            .await
    }

    /// [`Host::execute`] that stops with [`HostError::Cancelled`] when
    /// `cancel` fires.
    ///
    /// On cancellation the stored session is rolled back to what it held
    /// before this call, so a half-finished turn is never kept.
    pub async fn execute_with_cancel(
        &mut self,
        message: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut messages = self.load_history()?;
        let checkpoint = messages.clone();

        if messages.is_empty() {
            if let Some(prompt) = &self.system_prompt {
                messages.push(Message::system(prompt.clone()));
            }
        }
        messages.push(Message::user(message));
        self.store.save(&messages)?;

        match self.run_turn(&mut messages, cancel).await {
            Err(e) if matches!(e.downcast_ref::<HostError>(), Some(HostError::Cancelled)) => {
                warn!(
                    session = %self.store.name(),
                    discarded = messages.len().saturating_sub(checkpoint.len()),
                    "turn cancelled; rolling back"
                );
                self.store.save(&checkpoint)?;
                Err(e)
            }
            other => other,
        }
    }

    async fn run_turn(
        &self,
        messages: &mut Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let tools = self.namespace.flatten();
        let mut completions = 0usize;

        loop {
            if let Some(limit) = self.max_turns {
                if completions >= limit {
                    warn!("Maximum turns ({}) reached", limit);
                    return Err(HostError::MaxTurnsExceeded { limit }.into());
                }
            }
            completions += 1;

            debug!(
                "Completion {} with {} messages, {} tools",
                completions,
                messages.len(),
                tools.len()
            );
            let response = cancellable(cancel, self.provider.complete(messages, &tools)).await?;
            if let Some(usage) = response.usage {
                debug!(
                    prompt = usage.prompt_tokens,
                    completion = usage.completion_tokens,
                    "token usage"
                );
            }

            let mut reply = response.message;
            reply.role = crate::providers::base::ROLE_ASSISTANT.to_string();
            let calls = reply.requested_tool_calls().to_vec();
            messages.push(reply);
            self.store.save(messages)?;

            if calls.is_empty() {
                info!("Turn finished after {} completion call(s)", completions);
                return Ok(messages
                    .last()
                    .and_then(Message::text)
                    .unwrap_or_default());
            }

            debug!("Executing {} tool calls", calls.len());
            for call in &calls {
                let result = self.dispatch(call, cancel).await?;
                messages.push(result);
                self.store.save(messages)?;
            }
        }
    }

    /// Run one tool call and produce the tool message for it.
    ///
    /// Only cancellation is returned as an error.
    async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> Result<Message> {
        let tool = call.function.name.as_str();

        let arguments = match call.parsed_arguments() {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(tool = %tool, "invalid tool arguments: {}", e);
                return Ok(Message::tool_error(
                    &call.id,
                    format!("invalid JSON arguments for `{}`: {}", tool, e),
                ));
            }
        };

        let Some(session) = self
            .namespace
            .route(tool)
            .and_then(|server| self.sessions.iter().find(|s| s.name() == server))
        else {
            warn!(tool = %tool, "model requested an unknown tool");
            return Ok(Message::tool_error(
                &call.id,
                HostError::UnresolvedTool(tool.to_string()),
            ));
        };

        debug!(server = %session.name(), tool = %tool, "dispatching tool call");
        match cancellable(cancel, session.invoke(tool, arguments)).await {
            Ok(items) => Ok(Message::tool_result(&call.id, items)),
            Err(e) if matches!(e.downcast_ref::<HostError>(), Some(HostError::Cancelled)) => {
                Err(e)
            }
            Err(e) => {
                warn!(server = %session.name(), tool = %tool, "tool call failed: {:#}", e);
                Ok(Message::tool_error(&call.id, e))
            }
        }
    }

    /// Stored history, with any unanswered trailing tool calls removed.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Storage`] if the session file is unreadable.
    pub fn load_history(&self) -> Result<Vec<Message>> {
        let mut messages = self.store.load()?;
        let removed = trim_unanswered_tool_calls(&mut messages);
        if removed > 0 {
            warn!(
                session = %self.store.name(),
                removed,
                "dropped an unfinished tool-call turn from the stored session"
            );
        }
        Ok(messages)
    }

    /// Merged tool namespace captured at startup
    pub fn namespace(&self) -> &ToolNamespace {
        &self.namespace
    }

    /// Open sessions in configuration order
    pub fn sessions(&self) -> &[ToolSession] {
        &self.sessions
    }

    /// Server names in configuration order
    pub fn server_names(&self) -> Vec<&str> {
        self.sessions.iter().map(ToolSession::name).collect()
    }

    /// Session store backing the conversation
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Close every session in reverse-open order. Idempotent.
    pub async fn shutdown(&mut self) {
        close_sessions(&self.sessions).await;
    }
}

/// Open every server in configuration order and capture its tools.
///
/// On the first failure every session opened so far is closed, in reverse
/// order, before the error is returned. Callers own the returned sessions
/// and must hand them to [`close_sessions`] when done.
///
/// # Examples
///
/// ```
/// use mcphost::host::{close_sessions, open_servers};
/// use mcphost::mcp::config::ServerMap;
/// use mcphost::mcp::transport::TransportConnector;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let servers = ServerMap::new();
/// let (sessions, namespace) =
///     open_servers(&servers, &TransportConnector, &CancellationToken::new()).await?;
/// assert!(sessions.is_empty());
/// assert_eq!(namespace.tool_count(), 0);
/// close_sessions(&sessions).await;
/// # Ok::<(), anyhow::Error>(())
/// # }).unwrap();
/// ```
pub async fn open_servers(
    servers: &ServerMap,
    connector: &dyn Connector,
    cancel: &CancellationToken,
) -> Result<(Vec<ToolSession>, ToolNamespace)> {
    let mut sessions: Vec<ToolSession> = Vec::with_capacity(servers.len());
    let mut namespace = ToolNamespace::new();

    for (name, descriptor) in servers.iter() {
        let opened = cancellable(cancel, open_and_list(name, descriptor, connector)).await;
        match opened {
            Ok((session, tools)) => {
                info!(server = %name, tools = tools.len(), "server ready");
                namespace.push(name, tools);
                sessions.push(session);
            }
            Err(e) => {
                warn!(server = %name, "startup failed: {:#}", e);
                close_sessions(&sessions).await;
                return Err(e);
            }
        }
    }

    Ok((sessions, namespace))
}

async fn open_and_list(
    name: &str,
    descriptor: &crate::mcp::config::ServerDescriptor,
    connector: &dyn Connector,
) -> Result<(ToolSession, Vec<crate::providers::ToolDescriptor>)> {
    let session = ToolSession::open(name, descriptor, connector).await?;
    match session.list_tools().await {
        Ok(tools) => Ok((session, tools)),
        Err(e) => {
            if let Err(close_err) = session.close().await {
                debug!(server = %name, "close after failed tools/list: {}", close_err);
            }
            Err(e)
        }
    }
}

/// Close `sessions` last to first, logging failures.
pub async fn close_sessions(sessions: &[ToolSession]) {
    for session in sessions.iter().rev() {
        if let Err(e) = session.close().await {
            warn!(server = %session.name(), "failed to close tool session: {}", e);
        }
    }
}

/// Await `future` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HostError::Cancelled.into()),
        result = future => result,
    }
}
