//! Deployment orchestration
//!
//! `verify -> (confirmed) reload -> watch`. Each stage must succeed before the
//! next starts; once watching, a failed event is reported and the loop moves
//! on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::executor::CommandExecutor;
use crate::logger::StatusSink;
use crate::mapper::{map_event, ActionDispatcher, FsEvent};
use crate::path_map::PathResolver;
use crate::permissions::PermissionVerifier;
use crate::prompt::Confirmation;
use crate::reload::{ReloadEngine, ReloadReport};
use crate::ssh::SshTransport;
use crate::transport::{FileTransfer, RemoteShell};
use crate::watcher::FsWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadMode {
    Skip,
    /// Ask before wiping the remote target
    Confirm,
    /// Reload without asking
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    /// Remote target verified (and reloaded if requested); watching may start
    Ready { reload: Option<ReloadReport> },
    /// Operator declined the reload
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub applied: usize,
    pub failed: usize,
}

pub struct Engine {
    config: Arc<Config>,
    executor: Arc<CommandExecutor>,
    transfer: Arc<dyn FileTransfer>,
    status: Arc<dyn StatusSink>,
}

impl Engine {
    pub fn new(
        config: Config,
        shell: Arc<dyn RemoteShell>,
        transfer: Arc<dyn FileTransfer>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let executor = Arc::new(CommandExecutor::new(
            shell,
            status.clone(),
            config.command_timeout,
        ));
        Self {
            config: Arc::new(config),
            executor,
            transfer,
            status,
        }
    }

    /// Engine backed by real SSH sessions
    pub fn with_ssh(config: Config, status: Arc<dyn StatusSink>) -> Self {
        let config = Arc::new(config);
        let ssh = Arc::new(SshTransport::new(config.clone()));
        Self::new((*config).clone(), ssh.clone(), ssh, status)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn verifier(&self) -> PermissionVerifier {
        PermissionVerifier::new(
            self.executor.clone(),
            self.transfer.clone(),
            self.status.clone(),
        )
    }

    pub fn reload_engine(&self) -> ReloadEngine {
        ReloadEngine::new(
            self.executor.clone(),
            self.transfer.clone(),
            self.status.clone(),
            self.config.remote_path(),
            self.config.settle_delay(),
        )
    }

    pub fn dispatcher(&self) -> ActionDispatcher {
        ActionDispatcher::new(
            self.executor.clone(),
            self.transfer.clone(),
            self.status.clone(),
            self.config.host.clone(),
        )
    }

    pub async fn verify(&self) -> Result<()> {
        self.verifier().verify(&self.config).await
    }

    pub async fn ensure_remote_dir(&self) -> Result<bool> {
        self.verifier()
            .ensure_remote_dir(self.config.remote_path())
            .await
    }

    pub async fn reload(&self, local_dir: &Path) -> Result<ReloadReport> {
        self.reload_engine().reload(local_dir).await
    }

    /// Runs every stage that has to finish before watching can start.
    ///
    /// Verification failure and reload failure are hard stops: the caller
    /// gets the error and must not start the watch loop.
    pub async fn prepare(
        &self,
        local_dir: &Path,
        mode: ReloadMode,
        confirm: Arc<dyn Confirmation>,
    ) -> Result<Prepared> {
        self.verify().await?;

        let report = match mode {
            ReloadMode::Skip => None,
            ReloadMode::Confirm if !self.confirmed(confirm).await => {
                self.status.warn("Reload cancelled");
                return Ok(Prepared::Cancelled);
            }
            ReloadMode::Confirm | ReloadMode::Force => Some(self.reload(local_dir).await?),
        };
        Ok(Prepared::Ready { reload: report })
    }

    /// The prompt reads stdin, so it runs on the blocking pool
    async fn confirmed(&self, confirm: Arc<dyn Confirmation>) -> bool {
        let remote = self.config.remote_path().to_string();
        match tokio::task::spawn_blocking(move || confirm.confirm_reload(&remote)).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(error = %e, "confirmation prompt aborted");
                false
            }
        }
    }

    /// Maps one event and applies the resulting action
    pub async fn handle_event(&self, resolver: &PathResolver, event: &FsEvent) -> Result<()> {
        let action = match map_event(event, resolver, self.config.remote_path()) {
            Ok(action) => action,
            Err(e) => {
                self.status.error(&e.to_string());
                return Err(e);
            }
        };
        self.dispatcher().apply(&action).await
    }

    /// Consumes events until the channel closes. Actions on unrelated paths run
    /// concurrently; an action waits for every earlier one on the same path,
    /// an ancestor or a descendant. Failures are counted, never propagated.
    pub async fn watch(
        &self,
        root: &Path,
        mut events: mpsc::UnboundedReceiver<FsEvent>,
    ) -> WatchSummary {
        self.status
            .info(&format!("Watching {} for changes...", root.display()));
        let resolver = Arc::new(PathResolver::new(root));
        let dispatcher = Arc::new(self.dispatcher());
        let remote_root = self.config.remote_path().to_string();
        let mut in_flight: JoinSet<bool> = JoinSet::new();
        let mut lanes = PathLanes::default();
        let mut summary = WatchSummary::default();

        loop {
            tokio::select! {
                maybe = events.recv() => {
                    let Some(event) = maybe else { break };
                    tracing::debug!(kind = ?event.kind, path = %event.path.display(), "dispatching");
                    match map_event(&event, &resolver, &remote_root) {
                        Ok(action) => {
                            let dispatcher = dispatcher.clone();
                            let (done, earlier) = lanes.admit(&action.remote_path());
                            in_flight.spawn(async move {
                                for mut prior in earlier {
                                    // resolves once the earlier action's sender is dropped
                                    let _ = prior.changed().await;
                                }
                                let applied = dispatcher.apply(&action).await.is_ok();
                                drop(done);
                                applied
                            });
                        }
                        Err(e) => {
                            self.status.error(&e.to_string());
                            summary.failed += 1;
                        }
                    }
                }
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    tally(&mut summary, done);
                }
            }
        }
        while let Some(done) = in_flight.join_next().await {
            tally(&mut summary, done);
        }
        tracing::info!(applied = summary.applied, failed = summary.failed, "watch loop ended");
        summary
    }

    /// Full run: prepare, then watch `local_dir` until the process is killed
    pub async fn auto_deploy(
        &self,
        local_dir: &Path,
        mode: ReloadMode,
        confirm: Arc<dyn Confirmation>,
    ) -> Result<WatchSummary> {
        let root = watch_root(local_dir)?;
        if let Prepared::Cancelled = self.prepare(&root, mode, confirm).await? {
            return Ok(WatchSummary::default());
        }
        let (_guard, events) = FsWatcher::start(&root)?.into_parts();
        Ok(self.watch(&root, events).await)
    }
}

/// In-flight remote paths, each with a signal that closes when its action
/// finishes
#[derive(Default)]
struct PathLanes {
    in_flight: Vec<(String, watch::Receiver<()>)>,
}

impl PathLanes {
    /// Registers an action on `remote`. Returns the sender to drop once the
    /// action is done and the signals of the overlapping actions before it.
    fn admit(&mut self, remote: &str) -> (watch::Sender<()>, Vec<watch::Receiver<()>>) {
        self.in_flight.retain(|(_, rx)| rx.has_changed().is_ok());
        let earlier = self
            .in_flight
            .iter()
            .filter(|(path, _)| overlaps(path, remote))
            .map(|(_, rx)| rx.clone())
            .collect();
        let (tx, rx) = watch::channel(());
        self.in_flight.push((remote.to_string(), rx));
        (tx, earlier)
    }
}

fn overlaps(a: &str, b: &str) -> bool {
    let under = |child: &str, parent: &str| {
        child
            .strip_prefix(parent.trim_end_matches('/'))
            .is_some_and(|rest| rest.starts_with('/'))
    };
    a == b || under(a, b) || under(b, a)
}

fn tally(summary: &mut WatchSummary, done: std::result::Result<bool, tokio::task::JoinError>) {
    match done {
        Ok(true) => summary.applied += 1,
        Ok(false) => summary.failed += 1,
        Err(e) => {
            tracing::error!(error = %e, "sync action task aborted");
            summary.failed += 1;
        }
    }
}

/// Canonical form of the directory to mirror; event paths are reported
/// relative to it
pub fn watch_root(local_dir: &Path) -> Result<PathBuf> {
    let root = local_dir.canonicalize()?;
    if !root.is_dir() {
        return Err(SyncError::Configuration(format!(
            "{} is not a directory",
            local_dir.display()
        )));
    }
    Ok(root)
}
