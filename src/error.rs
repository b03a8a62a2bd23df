//! Error taxonomy shared by every engine component

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or invalid configuration value
    #[error("configuration: {0}")]
    Configuration(String),

    /// The SSH session could not be established or authenticated
    #[error("authentication failed for {user}@{host}: {reason}")]
    Authentication {
        host: String,
        user: String,
        reason: String,
    },

    /// A postcondition probe showed the remote side is not in the expected state
    #[error("remote state: {0}")]
    RemoteState(String),

    #[error("transfer of {} failed: {reason}", path.display())]
    Transfer { path: PathBuf, reason: String },

    /// The local path cannot be mapped to a unique remote-relative suffix
    #[error("cannot resolve {} under watch root {}", path.display(), root.display())]
    AmbiguousPath { path: PathBuf, root: PathBuf },

    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),

    /// Channel-level failure after the session was authenticated
    #[error("session: {0}")]
    Session(String),

    #[error("watch: {0}")]
    Watch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<notify::Error> for SyncError {
    fn from(e: notify::Error) -> Self {
        SyncError::Watch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
