//! Filesystem events -> remote actions
//!
//! Each event maps to exactly one [`SyncAction`]. Applying an action is two
//! round-trips: the operation itself, then a probe confirming the remote path
//! ended up in the expected state.

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::executor::CommandExecutor;
use crate::logger::StatusSink;
use crate::path_map::PathResolver;
use crate::remote_cmd::RemoteCommand;
use crate::transport::{FileTransfer, TransferScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub path: PathBuf,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    UploadFile {
        local: PathBuf,
        remote_dir: String,
        file_name: String,
    },
    CreateDir {
        remote: String,
    },
    DeleteFile {
        remote: String,
    },
    DeleteDir {
        remote: String,
    },
}

impl SyncAction {
    /// Remote path whose state the action changes
    pub fn remote_path(&self) -> String {
        match self {
            SyncAction::UploadFile {
                remote_dir,
                file_name,
                ..
            } => crate::path_map::join_remote(remote_dir, file_name),
            SyncAction::CreateDir { remote }
            | SyncAction::DeleteFile { remote }
            | SyncAction::DeleteDir { remote } => remote.clone(),
        }
    }
}

/// Resolves the event path and picks the remote operation for it
pub fn map_event(event: &FsEvent, resolver: &PathResolver, remote_root: &str) -> Result<SyncAction> {
    let action = match event.kind {
        FsEventKind::Add | FsEventKind::Change => {
            let r = resolver.resolve(&event.path, false)?;
            SyncAction::UploadFile {
                local: event.path.clone(),
                remote_dir: r.remote_dir(remote_root),
                file_name: r.file_name,
            }
        }
        FsEventKind::Unlink => SyncAction::DeleteFile {
            remote: resolver.resolve(&event.path, false)?.remote_file(remote_root),
        },
        FsEventKind::AddDir => SyncAction::CreateDir {
            remote: resolver.resolve(&event.path, true)?.remote_dir(remote_root),
        },
        FsEventKind::UnlinkDir => {
            let remote = resolver.resolve(&event.path, true)?.remote_dir(remote_root);
            // never let a directory event wipe the whole target
            if remote.trim_end_matches('/') == remote_root.trim_end_matches('/') {
                return Err(SyncError::AmbiguousPath {
                    path: event.path.clone(),
                    root: resolver.root().to_path_buf(),
                });
            }
            SyncAction::DeleteDir { remote }
        }
    };
    Ok(action)
}

pub struct ActionDispatcher {
    executor: Arc<CommandExecutor>,
    transfer: Arc<dyn FileTransfer>,
    status: Arc<dyn StatusSink>,
    host: String,
}

impl ActionDispatcher {
    pub fn new(
        executor: Arc<CommandExecutor>,
        transfer: Arc<dyn FileTransfer>,
        status: Arc<dyn StatusSink>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            transfer,
            status,
            host: host.into(),
        }
    }

    /// Performs the action and checks its postcondition. Every outcome is
    /// reported through the status sink; the result is returned as well.
    pub async fn apply(&self, action: &SyncAction) -> Result<()> {
        let result = match action {
            SyncAction::UploadFile {
                local,
                remote_dir,
                file_name,
            } => self.upload(local, remote_dir, file_name).await,
            SyncAction::CreateDir { remote } => self.create_dir(remote).await,
            SyncAction::DeleteFile { remote } => self.delete(remote, false).await,
            SyncAction::DeleteDir { remote } => self.delete(remote, true).await,
        };
        if let Err(e) = &result {
            self.status.error(&e.to_string());
            tracing::warn!(remote = %action.remote_path(), error = %e, "sync action failed");
        }
        result
    }

    async fn upload(&self, local: &Path, remote_dir: &str, file_name: &str) -> Result<()> {
        self.status
            .info(&format!("Uploading {file_name} to {remote_dir}"));
        self.transfer
            .upload(local, remote_dir, TransferScope::Entry)
            .await?;
        let remote = crate::path_map::join_remote(remote_dir, file_name);
        if !self.executor.probe(&RemoteCommand::IsFile(remote.clone())).await? {
            return Err(SyncError::RemoteState(format!(
                "{remote} missing after upload"
            )));
        }
        self.status.success(&format!(
            "Uploaded {file_name} to {} ({})",
            self.host,
            Local::now().format("%H:%M:%S")
        ));
        tracing::info!(remote = %remote, "uploaded");
        Ok(())
    }

    async fn create_dir(&self, remote: &str) -> Result<()> {
        self.status.info(&format!("Creating {remote}"));
        self.executor
            .run(&RemoteCommand::MakeDir(remote.to_string()), true)
            .await?;
        if self.executor.probe(&RemoteCommand::IsDir(remote.to_string())).await? {
            self.status.success(&format!("Created {remote}"));
            tracing::info!(remote, "directory created");
            Ok(())
        } else {
            Err(SyncError::RemoteState(format!("Failed to create {remote}")))
        }
    }

    async fn delete(&self, remote: &str, recursive: bool) -> Result<()> {
        self.status.info(&format!("Deleting {remote}"));
        let command = if recursive {
            RemoteCommand::RemoveTree(remote.to_string())
        } else {
            RemoteCommand::RemoveFile(remote.to_string())
        };
        self.executor.run(&command, true).await?;
        // already absent counts as deleted
        if self.executor.probe(&RemoteCommand::Exists(remote.to_string())).await? {
            Err(SyncError::RemoteState(format!("Failed to delete {remote}")))
        } else {
            self.status.success(&format!("Deleted {remote}"));
            tracing::info!(remote, recursive, "deleted");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new("/home/me/site")
    }

    #[test]
    fn change_maps_to_upload_into_parent() {
        let ev = FsEvent::new(FsEventKind::Change, "/home/me/site/src/app.js");
        let action = map_event(&ev, &resolver(), "/srv/app").unwrap();
        assert_eq!(
            action,
            SyncAction::UploadFile {
                local: PathBuf::from("/home/me/site/src/app.js"),
                remote_dir: "/srv/app/src".into(),
                file_name: "app.js".into(),
            }
        );
        assert_eq!(action.remote_path(), "/srv/app/src/app.js");
    }

    #[test]
    fn each_kind_maps_to_its_operation() {
        let r = resolver();
        let map = |kind, p: &str| map_event(&FsEvent::new(kind, p), &r, "/srv/app").unwrap();
        assert_eq!(
            map(FsEventKind::Unlink, "/home/me/site/a/b.txt"),
            SyncAction::DeleteFile {
                remote: "/srv/app/a/b.txt".into()
            }
        );
        assert_eq!(
            map(FsEventKind::AddDir, "/home/me/site/a/new"),
            SyncAction::CreateDir {
                remote: "/srv/app/a/new".into()
            }
        );
        assert_eq!(
            map(FsEventKind::UnlinkDir, "/home/me/site/old"),
            SyncAction::DeleteDir {
                remote: "/srv/app/old".into()
            }
        );
        assert!(matches!(
            map(FsEventKind::Add, "/home/me/site/top.txt"),
            SyncAction::UploadFile { ref remote_dir, .. } if remote_dir == "/srv/app"
        ));
    }

    #[test]
    fn unlinking_the_root_is_refused() {
        let ev = FsEvent::new(FsEventKind::UnlinkDir, "/home/me/site");
        assert!(matches!(
            map_event(&ev, &resolver(), "/srv/app"),
            Err(SyncError::AmbiguousPath { .. })
        ));
    }

    #[test]
    fn events_outside_the_root_fail_closed() {
        let ev = FsEvent::new(FsEventKind::Add, "/etc/passwd");
        assert!(map_event(&ev, &resolver(), "/srv/app").is_err());
    }
}
