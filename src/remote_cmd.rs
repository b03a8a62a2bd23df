//! Structured remote shell operations
//!
//! Remote paths are data: each one is quoted with `shell_escape` when the
//! command is rendered, so spaces, quotes or `;` in a file name cannot change
//! what runs on the remote host.

use shell_escape::unix::escape;
use std::borrow::Cow;
use std::fmt;

/// Answer printed by every yes/no probe
const YES: &str = "1";
const NO: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// `ls -ld`, used by the inspect permission check
    ListLong(String),
    /// `mkdir -p`; succeeds when the directory already exists
    MakeDir(String),
    RemoveFile(String),
    RemoveTree(String),
    /// Removes every non-hidden entry inside the directory
    ClearVisible(String),
    /// Removes every hidden entry inside the directory; the globs print an
    /// error when nothing matches, so callers silence stderr
    ClearHidden(String),
    /// Probe: path is a directory with no entries
    IsEmptyDir(String),
    IsDir(String),
    IsFile(String),
    Exists(String),
}

fn quote(path: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(path))
}

fn probe(test: &str) -> String {
    format!("{test} && echo {YES} || echo {NO}")
}

impl RemoteCommand {
    pub fn path(&self) -> &str {
        match self {
            RemoteCommand::ListLong(p)
            | RemoteCommand::MakeDir(p)
            | RemoteCommand::RemoveFile(p)
            | RemoteCommand::RemoveTree(p)
            | RemoteCommand::ClearVisible(p)
            | RemoteCommand::ClearHidden(p)
            | RemoteCommand::IsEmptyDir(p)
            | RemoteCommand::IsDir(p)
            | RemoteCommand::IsFile(p)
            | RemoteCommand::Exists(p) => p,
        }
    }

    pub fn is_probe(&self) -> bool {
        matches!(
            self,
            RemoteCommand::IsEmptyDir(_)
                | RemoteCommand::IsDir(_)
                | RemoteCommand::IsFile(_)
                | RemoteCommand::Exists(_)
        )
    }

    /// Renders the POSIX `sh` command line
    pub fn to_shell(&self) -> String {
        match self {
            RemoteCommand::ListLong(p) => format!("ls -ld -- {}", quote(p)),
            RemoteCommand::MakeDir(p) => format!("mkdir -p -- {}", quote(p)),
            RemoteCommand::RemoveFile(p) => format!("rm -f -- {}", quote(p)),
            RemoteCommand::RemoveTree(p) => format!("rm -rf -- {}", quote(p)),
            // The glob must stay outside the quotes to expand
            RemoteCommand::ClearVisible(p) => format!("rm -rf -- {}/*", quote(p)),
            RemoteCommand::ClearHidden(p) => {
                let q = quote(p);
                format!("rm -rf -- {q}/.[!.]* {q}/..?*")
            }
            RemoteCommand::IsEmptyDir(p) => {
                let q = quote(p);
                probe(&format!("[ -d {q} ] && [ -z \"$(ls -A -- {q})\" ]"))
            }
            RemoteCommand::IsDir(p) => probe(&format!("test -d {}", quote(p))),
            RemoteCommand::IsFile(p) => probe(&format!("test -f {}", quote(p))),
            RemoteCommand::Exists(p) => probe(&format!("test -e {}", quote(p))),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Reads the answer of a yes/no probe from its stdout.
///
/// Output may arrive split or padded; only the first non-empty line counts.
pub fn parse_probe(stdout: &str) -> Option<bool> {
    match stdout.lines().map(str::trim).find(|l| !l.is_empty())? {
        YES => Some(true),
        NO => Some(false),
        _ => None,
    }
}
