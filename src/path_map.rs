//! Local -> remote path resolution
//!
//! A local path is mapped by stripping the watch root structurally and
//! re-joining the remaining components with `/`. Nothing is cached: the local
//! tree changes between events, so every event is resolved on its own.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SyncError};

/// Remote-relative location of a local entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// `/`-separated, no leading or trailing separator, empty for the root.
    /// For directories this is the directory itself, for files its parent.
    pub remote_suffix: String,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &Path, as_directory: bool) -> Result<Resolved> {
        let ambiguous = || SyncError::AmbiguousPath {
            path: path.to_path_buf(),
            root: self.root.clone(),
        };
        let rel = path.strip_prefix(&self.root).map_err(|_| ambiguous())?;

        let mut segments: Vec<&str> = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(s) => segments.push(s.to_str().ok_or_else(ambiguous)?),
                Component::CurDir => {}
                _ => return Err(ambiguous()),
            }
        }

        if as_directory {
            let file_name = match segments.last() {
                Some(last) => (*last).to_string(),
                None => self
                    .root
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string(),
            };
            return Ok(Resolved {
                remote_suffix: segments.join("/"),
                file_name,
            });
        }

        let (file_name, parents) = segments.split_last().ok_or_else(ambiguous)?;
        Ok(Resolved {
            remote_suffix: parents.join("/"),
            file_name: (*file_name).to_string(),
        })
    }
}

/// Joins a remote base with a relative suffix, never doubling separators
pub fn join_remote(base: &str, suffix: &str) -> String {
    let suffix = suffix.trim_matches('/');
    if suffix.is_empty() {
        return base.to_string();
    }
    let base = base.trim_end_matches('/');
    format!("{base}/{suffix}")
}

impl Resolved {
    /// Remote directory that holds (or is) the entry
    pub fn remote_dir(&self, remote_root: &str) -> String {
        join_remote(remote_root, &self.remote_suffix)
    }

    /// Full remote path of a resolved file
    pub fn remote_file(&self, remote_root: &str) -> String {
        join_remote(&self.remote_dir(remote_root), &self.file_name)
    }
}
