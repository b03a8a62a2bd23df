//! In-memory remote host for driving the engine without SSH

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use mirror_deploy::config::{Config, Credential, VerifyStrategy};
use mirror_deploy::error::{Result, SyncError};
use mirror_deploy::logger::{RecordingStatus, StatusSink};
use mirror_deploy::remote_cmd::RemoteCommand;
use mirror_deploy::transport::{is_hidden, CommandOutput, FileTransfer, RemoteShell, TransferScope};
use mirror_deploy::Engine;

pub const REMOTE: &str = "/srv/app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Default)]
struct State {
    tree: BTreeMap<String, Node>,
    commands: Vec<RemoteCommand>,
    uploads: Vec<(PathBuf, String, TransferScope)>,
    finished: Vec<String>,
}

#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
    read_only: Mutex<bool>,
    stuck_after_clear: Mutex<bool>,
    latency: Mutex<HashMap<String, Duration>>,
    mkdir_latency: Mutex<Option<Duration>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryRemote {
    /// Remote host with an empty, writable `REMOTE` directory
    pub fn new() -> Arc<Self> {
        let remote = Arc::new(Self::default());
        remote.mkdir_p(REMOTE);
        remote
    }

    pub fn set_read_only(&self, on: bool) {
        *self.read_only.lock() = on;
    }

    /// Leaves one visible file behind on every clear
    pub fn set_stuck_after_clear(&self, on: bool) {
        *self.stuck_after_clear.lock() = on;
    }

    /// Delays uploads of the local entry named `name`
    pub fn delay_upload(&self, name: &str, by: Duration) {
        self.latency.lock().insert(name.to_string(), by);
    }

    /// Delays every `mkdir -p`, as a slow remote session would
    pub fn delay_mkdir(&self, by: Duration) {
        *self.mkdir_latency.lock() = Some(by);
    }

    /// Makes uploads of the local entry named `name` fail
    pub fn fail_upload(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn mkdir_p(&self, path: &str) {
        let mut state = self.state.lock();
        insert_dir(&mut state.tree, path);
    }

    pub fn put_file(&self, path: &str, body: &[u8]) {
        let mut state = self.state.lock();
        if let Some(parent) = parent_of(path) {
            insert_dir(&mut state.tree, &parent);
        }
        state.tree.insert(path.to_string(), Node::File(body.to_vec()));
    }

    pub fn node(&self, path: &str) -> Option<Node> {
        self.state.lock().tree.get(path).cloned()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.node(path) {
            Some(Node::File(body)) => Some(body),
            _ => None,
        }
    }

    /// Every path strictly below `dir`
    pub fn below(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{dir}/");
        self.state
            .lock()
            .tree
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn commands(&self) -> Vec<RemoteCommand> {
        self.state.lock().commands.clone()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String, TransferScope)> {
        self.state.lock().uploads.clone()
    }

    /// Local entry names in the order their uploads completed
    pub fn finished(&self) -> Vec<String> {
        self.state.lock().finished.clone()
    }

    fn run(&self, command: &RemoteCommand) -> CommandOutput {
        let read_only = *self.read_only.lock();
        let mut state = self.state.lock();
        state.commands.push(command.clone());
        let tree = &mut state.tree;
        let path = command.path().to_string();

        let answer = |yes: bool| CommandOutput {
            stdout: if yes { "1\n".into() } else { "0\n".into() },
            ..Default::default()
        };
        let denied = || CommandOutput {
            stderr: format!("{path}: Permission denied\n"),
            exit_status: 1,
            ..Default::default()
        };

        match command {
            RemoteCommand::ListLong(_) => match tree.get(&path) {
                Some(Node::Dir) if read_only => CommandOutput {
                    stdout: format!("dr-xr-xr-x 2 root root 4096 Jan  1 00:00 {path}\n"),
                    ..Default::default()
                },
                Some(Node::Dir) => CommandOutput {
                    stdout: format!("drwxr-xr-x 2 deploy deploy 4096 Jan  1 00:00 {path}\n"),
                    ..Default::default()
                },
                Some(Node::File(_)) => CommandOutput {
                    stdout: format!("-rw-r--r-- 1 deploy deploy 0 Jan  1 00:00 {path}\n"),
                    ..Default::default()
                },
                None => CommandOutput {
                    stderr: format!("ls: cannot access '{path}': No such file or directory\n"),
                    exit_status: 2,
                    ..Default::default()
                },
            },
            _ if read_only && !command.is_probe() => denied(),
            RemoteCommand::MakeDir(_) => {
                insert_dir(tree, &path);
                CommandOutput::default()
            }
            RemoteCommand::RemoveFile(_) => {
                if let Some(Node::File(_)) = tree.get(&path) {
                    tree.remove(&path);
                }
                CommandOutput::default()
            }
            RemoteCommand::RemoveTree(_) => {
                remove_tree(tree, &path);
                CommandOutput::default()
            }
            RemoteCommand::ClearVisible(_) | RemoteCommand::ClearHidden(_) => {
                let hidden = matches!(command, RemoteCommand::ClearHidden(_));
                for child in children(tree, &path) {
                    let name = child.rsplit('/').next().unwrap_or_default();
                    if name.starts_with('.') == hidden {
                        remove_tree(tree, &child);
                    }
                }
                if !hidden && *self.stuck_after_clear.lock() {
                    tree.insert(format!("{path}/immutable.lock"), Node::File(Vec::new()));
                }
                CommandOutput::default()
            }
            RemoteCommand::IsEmptyDir(_) => {
                answer(matches!(tree.get(&path), Some(Node::Dir)) && children(tree, &path).is_empty())
            }
            RemoteCommand::IsDir(_) => answer(matches!(tree.get(&path), Some(Node::Dir))),
            RemoteCommand::IsFile(_) => answer(matches!(tree.get(&path), Some(Node::File(_)))),
            RemoteCommand::Exists(_) => answer(tree.contains_key(&path)),
        }
    }

    fn store(&self, local: &Path, remote_dir: &str) -> Result<u64> {
        let mut state = self.state.lock();
        if !matches!(state.tree.get(remote_dir), Some(Node::Dir)) {
            return Err(SyncError::Transfer {
                path: local.to_path_buf(),
                reason: format!("scp: {remote_dir}: No such file or directory"),
            });
        }
        let base = local.parent().unwrap_or(local);
        let mut bytes = 0u64;
        for entry in WalkDir::new(local).sort_by_file_name() {
            let entry = entry.map_err(|e| SyncError::Transfer {
                path: local.to_path_buf(),
                reason: e.to_string(),
            })?;
            let rel = entry.path().strip_prefix(base).unwrap_or(entry.path());
            let remote = format!("{remote_dir}/{}", rel.to_string_lossy());
            if entry.file_type().is_dir() {
                insert_dir(&mut state.tree, &remote);
            } else {
                let body = std::fs::read(entry.path())?;
                bytes += body.len() as u64;
                state.tree.insert(remote, Node::File(body));
            }
        }
        Ok(bytes)
    }
}

#[async_trait]
impl RemoteShell for MemoryRemote {
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        if let RemoteCommand::MakeDir(_) = command {
            let delay = *self.mkdir_latency.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(self.run(command))
    }
}

#[async_trait]
impl FileTransfer for MemoryRemote {
    async fn upload(&self, local: &Path, remote_dir: &str, scope: TransferScope) -> Result<u64> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.state
            .lock()
            .uploads
            .push((local.to_path_buf(), remote_dir.to_string(), scope));

        let delay = self.latency.lock().get(&name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.read_only.lock() || self.failing.lock().contains(&name) {
            return Err(SyncError::Transfer {
                path: local.to_path_buf(),
                reason: "scp: Permission denied".into(),
            });
        }

        let bytes = match scope {
            TransferScope::Entry => self.store(local, remote_dir)?,
            TransferScope::VisibleContents => {
                let mut bytes = 0;
                let mut entries: Vec<_> = std::fs::read_dir(local)?.collect::<std::io::Result<_>>()?;
                entries.sort_by_key(|e| e.file_name());
                for entry in entries.into_iter().filter(|e| !is_hidden(&e.file_name())) {
                    bytes += self.store(&entry.path(), remote_dir)?;
                }
                bytes
            }
        };
        self.state.lock().finished.push(name);
        Ok(bytes)
    }
}

fn parent_of(path: &str) -> Option<String> {
    path.rsplit_once('/')
        .map(|(p, _)| p)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

fn insert_dir(tree: &mut BTreeMap<String, Node>, path: &str) {
    let mut current = String::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        tree.entry(current.clone()).or_insert(Node::Dir);
    }
}

fn children(tree: &BTreeMap<String, Node>, dir: &str) -> Vec<String> {
    let prefix = format!("{dir}/");
    tree.keys()
        .filter(|k| k.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
        .cloned()
        .collect()
}

fn remove_tree(tree: &mut BTreeMap<String, Node>, path: &str) {
    let prefix = format!("{path}/");
    tree.retain(|k, _| k != path && !k.starts_with(&prefix));
}

pub fn config(verify: VerifyStrategy) -> Config {
    let mut config = Config::default();
    config.host = "mirror.test".into();
    config.username = "deploy".into();
    config.credential = Some(Credential::Password(secrecy::SecretString::new("hunter2".into())));
    config.set_remote_path(REMOTE);
    config.set_settle_delay(Duration::ZERO);
    config.verify = verify;
    config
}

pub fn engine(remote: &Arc<MemoryRemote>, verify: VerifyStrategy) -> (Engine, Arc<RecordingStatus>) {
    let status = Arc::new(RecordingStatus::new());
    let sink: Arc<dyn StatusSink> = status.clone();
    let engine = Engine::new(config(verify), remote.clone(), remote.clone(), sink);
    (engine, status)
}

/// Writes `files` (relative path, contents) under `root`
pub fn populate(root: &Path, files: &[(&str, &str)]) {
    for (rel, body) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }
}
