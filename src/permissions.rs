//! Write-access verification for the remote target

use std::sync::Arc;
use uuid::Uuid;

use crate::config::{Config, VerifyStrategy};
use crate::error::{Result, SyncError};
use crate::executor::CommandExecutor;
use crate::logger::StatusSink;
use crate::path_map::join_remote;
use crate::remote_cmd::RemoteCommand;
use crate::transport::{FileTransfer, TransferScope};

/// Prefix of the marker file uploaded by the write probe
pub const PROBE_PREFIX: &str = ".mdeploy-probe-";

pub struct PermissionVerifier {
    executor: Arc<CommandExecutor>,
    transfer: Arc<dyn FileTransfer>,
    status: Arc<dyn StatusSink>,
}

impl PermissionVerifier {
    pub fn new(
        executor: Arc<CommandExecutor>,
        transfer: Arc<dyn FileTransfer>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            executor,
            transfer,
            status,
        }
    }

    /// Confirms `config.remote_path()` is a directory the configured user can
    /// write to. Must succeed before the watch loop may start.
    pub async fn verify(&self, config: &Config) -> Result<()> {
        let remote = config.remote_path();
        self.status.info(&format!(
            "Checking {} has the correct permissions on {} for {} directory",
            config.username, config.host, remote
        ));
        if remote.is_empty() {
            let err = SyncError::Configuration("remote_path is not set".into());
            self.status.error(&err.to_string());
            return Err(err);
        }

        let result = match config.verify {
            VerifyStrategy::Inspect => self.inspect(remote).await,
            VerifyStrategy::Probe => self.write_probe(remote).await,
        };
        match &result {
            Ok(()) => {
                self.status
                    .success(&format!("{} is authorised!", config.username));
                tracing::info!(remote, strategy = ?config.verify, "write access verified");
            }
            Err(e) => {
                self.status.error(&e.to_string());
                self.status.error(
                    "The configuration details you've set are incorrect, please change and try again",
                );
                tracing::warn!(remote, error = %e, "write access check failed");
            }
        }
        result
    }

    async fn inspect(&self, remote: &str) -> Result<()> {
        let out = self
            .executor
            .run(&RemoteCommand::ListLong(remote.to_string()), false)
            .await?;
        if is_owner_writable_dir(&out.stdout) {
            Ok(())
        } else {
            Err(SyncError::RemoteState(format!(
                "{remote} is not an owner-writable directory"
            )))
        }
    }

    /// Uploads a throwaway marker file; a successful upload is the proof
    async fn write_probe(&self, remote: &str) -> Result<()> {
        let dir = tokio::task::spawn_blocking(tempfile::tempdir)
            .await
            .map_err(std::io::Error::other)??;
        let name = format!("{PROBE_PREFIX}{}", Uuid::new_v4().simple());
        let marker = dir.path().join(&name);
        tokio::fs::write(&marker, b"mdeploy write probe\n").await?;

        let uploaded = self
            .transfer
            .upload(&marker, remote, TransferScope::Entry)
            .await;

        if uploaded.is_ok() {
            let cleanup = RemoteCommand::RemoveFile(join_remote(remote, &name));
            if let Err(e) = self.executor.run(&cleanup, false).await {
                self.status
                    .warn(&format!("Could not remove probe file {name}: {e}"));
            }
        }
        // the local marker goes away with `dir`
        drop(dir);

        match uploaded {
            Ok(_) => Ok(()),
            Err(e @ SyncError::Authentication { .. }) => Err(e),
            Err(e) => Err(SyncError::RemoteState(format!(
                "cannot write to {remote}: {e}"
            ))),
        }
    }

    /// Creates the remote target when it does not exist yet. Returns whether
    /// it had to be created.
    pub async fn ensure_remote_dir(&self, remote: &str) -> Result<bool> {
        if self
            .executor
            .probe(&RemoteCommand::IsDir(remote.to_string()))
            .await?
        {
            return Ok(false);
        }
        if self
            .executor
            .probe(&RemoteCommand::Exists(remote.to_string()))
            .await?
        {
            return Err(SyncError::RemoteState(format!(
                "{remote} exists but is not a directory"
            )));
        }
        self.status.info(&format!("Creating remote directory {remote}"));
        self.executor
            .run(&RemoteCommand::MakeDir(remote.to_string()), true)
            .await?;
        if self
            .executor
            .probe(&RemoteCommand::IsDir(remote.to_string()))
            .await?
        {
            self.status.success(&format!("Created {remote}"));
            Ok(true)
        } else {
            Err(SyncError::RemoteState(format!("failed to create {remote}")))
        }
    }
}

/// `ls -ld` output of a directory whose owner can read and write it
pub fn is_owner_writable_dir(listing: &str) -> bool {
    let mode = listing.trim_start().as_bytes();
    mode.len() >= 3 && mode[0] == b'd' && mode[1] == b'r' && mode[2] == b'w'
}
