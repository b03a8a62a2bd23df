//! Local filesystem watching
//!
//! `notify` reports raw kernel events. [`EventClassifier`] turns them into the
//! five event kinds the mapper understands, remembering which paths are
//! directories so a removal can still be told apart after the entry is gone.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::error::Result;
use crate::mapper::{FsEvent, FsEventKind};

pub struct EventClassifier {
    root: PathBuf,
    known_dirs: HashSet<PathBuf>,
}

impl EventClassifier {
    /// Seeds the directory set from the current contents of `root`
    pub fn new(root: &Path) -> Self {
        let known_dirs = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect();
        Self {
            root: root.to_path_buf(),
            known_dirs,
        }
    }

    pub fn is_known_dir(&self, path: &Path) -> bool {
        self.known_dirs.contains(path)
    }

    pub fn classify(&mut self, event: &Event) -> Vec<FsEvent> {
        let mut out = Vec::new();
        match &event.kind {
            EventKind::Create(kind) => {
                for path in &event.paths {
                    self.created(path, Some(*kind), &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => {
                    for path in &event.paths {
                        self.removed(path, None, &mut out);
                    }
                }
                RenameMode::To => {
                    for path in &event.paths {
                        self.created(path, None, &mut out);
                    }
                }
                RenameMode::Both if event.paths.len() == 2 => {
                    self.removed(&event.paths[0], None, &mut out);
                    self.created(&event.paths[1], None, &mut out);
                }
                _ => {
                    // platform could not pair the rename; look at what exists now
                    for path in &event.paths {
                        if path.exists() {
                            self.created(path, None, &mut out);
                        } else {
                            self.removed(path, None, &mut out);
                        }
                    }
                }
            },
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                for path in &event.paths {
                    if path != &self.root && path.is_file() {
                        out.push(FsEvent::new(FsEventKind::Change, path.clone()));
                    }
                }
            }
            EventKind::Remove(kind) => {
                for path in &event.paths {
                    self.removed(path, Some(*kind), &mut out);
                }
            }
            _ => {}
        }
        out
    }

    fn created(&mut self, path: &Path, kind: Option<CreateKind>, out: &mut Vec<FsEvent>) {
        if path == self.root {
            return;
        }
        let is_dir = match kind {
            Some(CreateKind::Folder) => true,
            Some(CreateKind::File) => false,
            _ => path.is_dir(),
        };
        if !is_dir {
            if path.is_file() {
                out.push(FsEvent::new(FsEventKind::Add, path));
            }
            return;
        }

        self.known_dirs.insert(path.to_path_buf());
        out.push(FsEvent::new(FsEventKind::AddDir, path));
        // a directory moved in arrives as one event; emit its contents too
        for entry in WalkDir::new(path)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() {
                self.known_dirs.insert(entry.path().to_path_buf());
                out.push(FsEvent::new(FsEventKind::AddDir, entry.path()));
            } else if entry.file_type().is_file() {
                out.push(FsEvent::new(FsEventKind::Add, entry.path()));
            }
        }
    }

    fn removed(&mut self, path: &Path, kind: Option<RemoveKind>, out: &mut Vec<FsEvent>) {
        if path == self.root {
            return;
        }
        let was_dir = self.known_dirs.remove(path) || kind == Some(RemoveKind::Folder);
        if was_dir {
            self.known_dirs.retain(|d| !d.starts_with(path));
            out.push(FsEvent::new(FsEventKind::UnlinkDir, path));
        } else {
            out.push(FsEvent::new(FsEventKind::Unlink, path));
        }
    }
}

/// Recursive watcher on one root, bridged into a tokio channel
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<FsEvent>,
}

impl FsWatcher {
    pub fn start(root: &Path) -> Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let mut classifier = EventClassifier::new(root);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for ev in classifier.classify(&event) {
                    tracing::debug!(kind = ?ev.kind, path = %ev.path.display(), "fs event");
                    if tx.send(ev).is_err() {
                        return;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching");
        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Splits into the receiver and a guard that keeps the watcher alive
    pub fn into_parts(self) -> (WatchGuard, mpsc::UnboundedReceiver<FsEvent>) {
        (
            WatchGuard {
                _watcher: self._watcher,
            },
            self.events,
        )
    }
}

/// Dropping the guard stops the underlying watcher
pub struct WatchGuard {
    _watcher: RecommendedWatcher,
}
