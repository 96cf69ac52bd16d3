//! Durable session storage
//!
//! One session is one JSON file, `<dir>/<name>.json`, holding the ordered
//! message array in the Chat Completions wire shape. Every save replaces the
//! whole file: the new contents go to a temporary sibling which is flushed
//! to disk and then renamed over the target, so a reader never observes a
//! partially written session.

use crate::config::HostConfig;
use crate::error::{HostError, Result};
use crate::providers::Message;
use anyhow::Context;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File-backed store for one named session
#[derive(Debug, Clone)]
pub struct SessionStore {
    name: String,
    path: PathBuf,
}

impl SessionStore {
    /// Create a store for session `name` inside `dir`.
    ///
    /// Nothing is touched on disk until the first save.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Storage`] if `name` is empty or is not a plain
    /// file name.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::storage::SessionStore;
    ///
    /// let store = SessionStore::new("/tmp/sessions", "host").unwrap();
    /// assert!(store.path().ends_with("host.json"));
    /// ```
    pub fn new<P: Into<PathBuf>>(dir: P, name: &str) -> Result<Self> {
        if name.trim().is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name == "."
            || name == ".."
        {
            return Err(HostError::Storage(format!("invalid session name: {:?}", name)).into());
        }
        let path = dir.into().join(format!("{}.json", name));
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    /// Store for the session named in the host configuration.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::new`].
    pub fn from_config(host: &HostConfig) -> Result<Self> {
        Self::new(host.resolved_session_dir(), &host.session_name)
    }

    /// Session name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the session file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the session file exists
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the stored messages; a missing file is an empty session.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Storage`] if the file exists but cannot be read
    /// or does not hold a JSON message array.
    pub fn load(&self) -> Result<Vec<Message>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(session = %self.name, "no stored session, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(HostError::Storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                ))
                .into())
            }
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let messages: Vec<Message> = serde_json::from_str(&contents).map_err(|e| {
            HostError::Storage(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        tracing::debug!(session = %self.name, count = messages.len(), "loaded session");
        Ok(messages)
    }

    /// Replace the stored session with `messages`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Storage`] if any step of the write fails. The
    /// previous contents stay in place in that case.
    pub fn save(&self, messages: &[Message]) -> Result<()> {
        self.write_atomically(&render(messages)?)
            .map_err(|e| HostError::Storage(format!("{:#}", e)))?;
        tracing::trace!(session = %self.name, count = messages.len(), "session persisted");
        Ok(())
    }

    /// Delete the stored session. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Storage`] if the file exists but cannot be
    /// removed.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HostError::Storage(format!(
                "failed to remove {}: {}",
                self.path.display(),
                e
            ))
            .into()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = format!(".{}.json.tmp", self.name);
        match self.path.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        }
    }

    fn write_atomically(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let temp = self.temp_path();
        let written = (|| -> anyhow::Result<()> {
            let mut file = std::fs::File::create(&temp)
                .with_context(|| format!("failed to create {}", temp.display()))?;
            file.write_all(bytes)
                .with_context(|| format!("failed to write {}", temp.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to flush {}", temp.display()))?;
            std::fs::rename(&temp, &self.path).with_context(|| {
                format!("failed to replace {}", self.path.display())
            })
        })();

        if written.is_err() {
            let _ = std::fs::remove_file(&temp);
            return written;
        }

        // Persist the rename itself.
        #[cfg(unix)]
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }

        Ok(())
    }
}

/// Pretty JSON with a four-space indent and a trailing newline.
fn render(messages: &[Message]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256 * messages.len().max(1));
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    messages.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}
