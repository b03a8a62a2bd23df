//! Full wipe-and-reupload of the remote target
//!
//! Phases run strictly in order: `Idle -> Clearing -> Uploading -> Done`.
//! Uploading only starts once the target has been probed empty. Transfers are
//! dispatched together and joined through a [`Barrier`] keyed by task
//! identity, so completion is signalled once, on the last settlement, however
//! the transfers happen to finish.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::executor::CommandExecutor;
use crate::logger::StatusSink;
use crate::remote_cmd::RemoteCommand;
use crate::transport::{is_hidden, FileTransfer, TransferScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadPhase {
    Idle,
    Clearing,
    Uploading,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskId {
    /// A hidden top-level entry, by file name
    Hidden(String),
    /// Everything else in the tree
    Tree,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Hidden(name) => f.write_str(name),
            TaskId::Tree => f.write_str("directory tree"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: TaskId,
    pub local: PathBuf,
    pub scope: TransferScope,
}

/// Builds the pending transfer set: one task per hidden top-level entry of
/// `local_dir` plus one task for the visible tree.
pub fn plan_transfers(local_dir: &Path) -> Result<Vec<TransferTask>> {
    let mut tasks = Vec::new();
    for entry in WalkDir::new(local_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| SyncError::Transfer {
            path: local_dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        if is_hidden(entry.file_name()) {
            tasks.push(TransferTask {
                id: TaskId::Hidden(entry.file_name().to_string_lossy().into_owned()),
                local: entry.path().to_path_buf(),
                scope: TransferScope::Entry,
            });
        }
    }
    tasks.push(TransferTask {
        id: TaskId::Tree,
        local: local_dir.to_path_buf(),
        scope: TransferScope::VisibleContents,
    });
    Ok(tasks)
}

/// What the barrier saw once every task settled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierOutcome {
    pub settled: usize,
    pub bytes: u64,
    pub failures: Vec<(TaskId, String)>,
}

#[derive(Default)]
struct BarrierState {
    pending: BTreeSet<TaskId>,
    outcome: BarrierOutcome,
    fired: bool,
}

/// Join point over a known set of task identities.
///
/// `settle` hands back the outcome exactly once: on the call that removes the
/// last pending identity. Unknown or already settled identities are ignored,
/// so a late or duplicated completion cannot be counted twice.
pub struct Barrier {
    state: Mutex<BarrierState>,
}

impl Barrier {
    pub fn new(ids: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                pending: ids.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn settle(&self, id: &TaskId, result: std::result::Result<u64, String>) -> Option<BarrierOutcome> {
        let mut state = self.state.lock();
        if !state.pending.remove(id) {
            return None;
        }
        state.outcome.settled += 1;
        match result {
            Ok(bytes) => state.outcome.bytes += bytes,
            Err(reason) => state.outcome.failures.push((id.clone(), reason)),
        }
        if state.pending.is_empty() && !state.fired {
            state.fired = true;
            return Some(state.outcome.clone());
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub tasks: usize,
    pub bytes: u64,
    pub elapsed: Duration,
}

pub struct ReloadEngine {
    executor: Arc<CommandExecutor>,
    transfer: Arc<dyn FileTransfer>,
    status: Arc<dyn StatusSink>,
    remote_path: String,
    settle_delay: Duration,
    phase: Mutex<ReloadPhase>,
}

impl ReloadEngine {
    pub fn new(
        executor: Arc<CommandExecutor>,
        transfer: Arc<dyn FileTransfer>,
        status: Arc<dyn StatusSink>,
        remote_path: impl Into<String>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            executor,
            transfer,
            status,
            remote_path: remote_path.into(),
            settle_delay,
            phase: Mutex::new(ReloadPhase::Idle),
        }
    }

    pub fn phase(&self) -> ReloadPhase {
        *self.phase.lock()
    }

    fn enter(&self, phase: ReloadPhase) {
        tracing::debug!(?phase, remote = %self.remote_path, "reload phase");
        *self.phase.lock() = phase;
    }

    /// Clears the remote target and uploads `local_dir` into it. Resolves
    /// once, after every transfer has settled.
    pub async fn reload(&self, local_dir: &Path) -> Result<ReloadReport> {
        self.status.warn("Preparing to reload...");
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        self.enter(ReloadPhase::Clearing);
        if let Err(e) = self.clear().await {
            self.status.error(&e.to_string());
            self.enter(ReloadPhase::Done);
            return Err(e);
        }

        self.enter(ReloadPhase::Uploading);
        let result = self.upload_all(local_dir).await;
        self.enter(ReloadPhase::Done);
        result
    }

    async fn clear(&self) -> Result<()> {
        let remote = &self.remote_path;
        self.status.info(&format!("Removing contents of {remote}"));
        self.executor
            .run(&RemoteCommand::ClearVisible(remote.clone()), true)
            .await?;
        self.executor
            .run(&RemoteCommand::ClearHidden(remote.clone()), false)
            .await?;
        if self
            .executor
            .probe(&RemoteCommand::IsEmptyDir(remote.clone()))
            .await?
        {
            Ok(())
        } else {
            Err(SyncError::RemoteState(format!(
                "{remote} is not an empty directory after clearing; refusing to upload"
            )))
        }
    }

    async fn upload_all(&self, local_dir: &Path) -> Result<ReloadReport> {
        self.status.warn("Reloading...");
        let begin = Instant::now();
        let tasks = plan_transfers(local_dir)?;
        let total = tasks.len();
        let barrier = Barrier::new(tasks.iter().map(|t| t.id.clone()));

        let mut set = JoinSet::new();
        let mut by_task = HashMap::new();
        for task in tasks {
            let transfer = self.transfer.clone();
            let remote = self.remote_path.clone();
            let id = task.id.clone();
            let handle = set.spawn(async move {
                let result = transfer.upload(&task.local, &remote, task.scope).await;
                (task.id, result)
            });
            by_task.insert(handle.id(), id);
        }

        let mut outcome = None;
        while let Some(joined) = set.join_next().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result.map_err(|e| e.to_string())),
                Err(e) => match by_task.get(&e.id()) {
                    Some(id) => (id.clone(), Err(format!("transfer task aborted: {e}"))),
                    None => continue,
                },
            };
            match &result {
                Ok(bytes) => tracing::debug!(task = %id, bytes, "reload transfer settled"),
                Err(reason) => self.status.error(&format!("Uploading {id}: {reason}")),
            }
            if let Some(done) = barrier.settle(&id, result) {
                outcome = Some(done);
            }
        }

        let outcome = outcome.ok_or_else(|| {
            SyncError::RemoteState(format!("{} reload transfers never settled", barrier.pending()))
        })?;
        let elapsed = begin.elapsed();
        tracing::info!(
            tasks = total,
            bytes = outcome.bytes,
            failed = outcome.failures.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "reload finished"
        );

        if let Some((id, reason)) = outcome.failures.first() {
            let path = match id {
                TaskId::Hidden(name) => local_dir.join(name),
                TaskId::Tree => local_dir.to_path_buf(),
            };
            self.status.error(&format!(
                "Reload failed: {} of {} transfers did not complete",
                outcome.failures.len(),
                total
            ));
            return Err(SyncError::Transfer {
                path,
                reason: reason.clone(),
            });
        }

        self.status
            .success(&format!("Reloaded in {:.3}secs!", elapsed.as_secs_f64()));
        Ok(ReloadReport {
            tasks: total,
            bytes: outcome.bytes,
            elapsed,
        })
    }
}
