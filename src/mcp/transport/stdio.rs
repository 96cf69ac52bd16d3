//! Stdio transport for MCP child-process servers
//!
//! [`StdioTransport`] spawns a child process and exchanges newline-delimited
//! JSON over its stdin/stdout pipes. The child's stderr is forwarded to a
//! diagnostic stream and logged at `DEBUG`; it is never an error condition.
//!
//! # Environment
//!
//! The child does not inherit the full parent environment. Only a small set
//! of variables needed to locate executables and the user's home survive
//! (see [`INHERITED_ENV_VARS`]); the descriptor's `env` map is applied on top.
//!
//! # Lifecycle
//!
//! [`Transport::close`] sends SIGTERM (Unix), waits up to
//! [`CLOSE_GRACE_PERIOD`] for the child to exit, then kills it. Dropping the
//! transport without closing it sends a best-effort SIGTERM.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{HostError, Result};
use crate::mcp::transport::Transport;

/// Parent environment variables passed through to every child.
#[cfg(unix)]
pub const INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

/// Parent environment variables passed through to every child.
#[cfg(windows)]
pub const INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// How long `close` waits after SIGTERM before killing the child.
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Build the child environment: inherited safe variables overlaid with `env`.
pub fn child_environment(env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = INHERITED_ENV_VARS
        .iter()
        .filter_map(|key| {
            std::env::var(key)
                .ok()
                // Exported shell functions are not valid for a fresh process.
                .filter(|value| !value.starts_with("()"))
                .map(|value| (key.to_string(), value))
        })
        .collect();
    merged.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Stdio-based MCP transport that drives a child process.
#[derive(Debug)]
pub struct StdioTransport {
    /// Sender side of the stdin channel; `send()` writes here.
    stdin_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver for stdout lines (one JSON message per line).
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Shared receiver for stderr lines (diagnostics only).
    stderr_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Handle to the spawned child process.
    child: Arc<Mutex<Child>>,
    /// Set once `close` has run.
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn a child process and wire up stdio pipes.
    ///
    /// Three background tasks are started: a stdin writer, a stdout reader
    /// and a stderr reader.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::McpTransport`] if the process cannot be spawned
    /// or if the stdio pipes are unavailable.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::collections::HashMap;
    /// use mcphost::mcp::transport::stdio::StdioTransport;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// let transport = StdioTransport::spawn(
    ///     "npx".into(),
    ///     vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
    ///     HashMap::new(),
    ///     None,
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut cmd = Command::new(&executable);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(child_environment(&env))
            .kill_on_drop(false);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            HostError::McpTransport(format!(
                "failed to spawn MCP server `{}`: {}",
                executable.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::McpTransport("child stdin unavailable after spawn".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            HostError::McpTransport("child stdout unavailable after spawn".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            HostError::McpTransport("child stderr unavailable after spawn".into())
        })?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stdout_tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        });

        let program = executable.display().to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(program = %program, "mcp server stderr: {}", line);
                if stderr_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            stdin_tx,
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            child: Arc::new(Mutex::new(child)),
            closed: AtomicBool::new(false),
        })
    }

    /// OS process id of the child, if it is still running.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Enqueue a JSON-RPC message for the child's stdin.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::McpTransport`] if the background writer task has
    /// exited.
    async fn send(&self, message: String) -> Result<()> {
        self.stdin_tx
            .send(message)
            .map_err(|e| HostError::McpTransport(format!("stdin channel closed: {}", e)).into())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stdout_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stderr_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut child = self.child.lock().await;
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        send_sigterm(&mut child);

        match tokio::time::timeout(CLOSE_GRACE_PERIOD, child.wait()).await {
            Ok(status) => {
                tracing::debug!("mcp server exited: {:?}", status.ok());
            }
            Err(_) => {
                tracing::warn!("mcp server ignored SIGTERM; killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

impl Drop for StdioTransport {
    /// Best-effort SIGTERM when the transport was never closed. Must not block.
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut child) = self.child.try_lock() {
            send_sigterm(&mut child);
        }
    }
}
