//! Transport seams
//!
//! The engine talks to the remote host only through these two traits. The SSH
//! implementation lives in `ssh`; tests drive the engine with in-memory fakes.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::remote_cmd::RemoteCommand;

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs one command in a fresh authenticated session
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput>;
}

/// What part of a local path an upload copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferScope {
    /// The file or directory itself, placed inside the remote directory
    Entry,
    /// The directory's children except its top-level hidden entries, placed
    /// directly in the remote directory
    VisibleContents,
}

#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copies `local` into `remote_dir`; returns the number of bytes sent
    async fn upload(&self, local: &Path, remote_dir: &str, scope: TransferScope) -> Result<u64>;
}

/// True for dot-files and dot-directories
pub fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}
