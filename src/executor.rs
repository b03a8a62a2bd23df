//! Command executor: one remote command, one outcome

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::logger::StatusSink;
use crate::remote_cmd::{parse_probe, RemoteCommand};
use crate::transport::{CommandOutput, RemoteShell};

pub struct CommandExecutor {
    shell: Arc<dyn RemoteShell>,
    status: Arc<dyn StatusSink>,
    timeout: Option<Duration>,
}

impl CommandExecutor {
    pub fn new(
        shell: Arc<dyn RemoteShell>,
        status: Arc<dyn StatusSink>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            shell,
            status,
            timeout,
        }
    }

    /// Runs `command` and returns its aggregated output.
    ///
    /// Remote stderr goes to the status sink unless `report_errors` is false.
    /// A non-zero exit status is not an error here; callers decide through
    /// probes what the outcome means.
    pub async fn run(&self, command: &RemoteCommand, report_errors: bool) -> Result<CommandOutput> {
        tracing::debug!(command = %command, "remote exec");
        let exec = self.shell.execute(command);
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exec)
                .await
                .map_err(|_| SyncError::Timeout(limit))??,
            None => exec.await?,
        };

        let stderr = output.stderr.trim();
        if report_errors && !stderr.is_empty() {
            self.status.error(stderr);
        }
        if !output.success() {
            tracing::debug!(command = %command, status = output.exit_status, stderr, "remote command exited non-zero");
        }
        Ok(output)
    }

    /// Runs a yes/no probe; stderr is never reported for probes
    pub async fn probe(&self, command: &RemoteCommand) -> Result<bool> {
        let output = self.run(command, false).await?;
        parse_probe(&output.stdout).ok_or_else(|| {
            SyncError::RemoteState(format!(
                "unexpected probe answer {:?} for {}",
                output.stdout.trim(),
                command.path()
            ))
        })
    }
}
