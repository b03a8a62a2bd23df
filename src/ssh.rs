//! SSH transport over `ssh2`
//!
//! One session per call: connect, handshake, authenticate, do the work, drop.
//! `ssh2` is blocking, so every call runs on tokio's blocking pool.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use ssh2::Session;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::{Config, Credential};
use crate::error::{Result, SyncError};
use crate::path_map::{join_remote, PathResolver};
use crate::remote_cmd::RemoteCommand;
use crate::transport::{is_hidden, CommandOutput, FileTransfer, RemoteShell, TransferScope};

#[derive(Clone)]
pub struct SshTransport {
    config: Arc<Config>,
}

impl SshTransport {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn auth_error(&self, reason: impl ToString) -> SyncError {
        SyncError::Authentication {
            host: self.config.host.clone(),
            user: self.config.username.clone(),
            reason: reason.to_string(),
        }
    }

    fn connect(&self) -> Result<Session> {
        let cfg = &self.config;
        let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port))
            .map_err(|e| self.auth_error(format!("connect {}:{}: {e}", cfg.host, cfg.port)))?;
        let mut session = Session::new().map_err(|e| self.auth_error(e))?;
        if let Some(t) = cfg.command_timeout {
            session.set_timeout(t.as_millis().min(u32::MAX as u128) as u32);
        }
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| self.auth_error(e))?;

        let user = cfg.username.as_str();
        let attempt = match &cfg.credential {
            Some(Credential::Password(pw)) => session.userauth_password(user, pw.expose_secret()),
            Some(Credential::IdentityFile { path, passphrase }) => session.userauth_pubkey_file(
                user,
                None,
                path,
                passphrase.as_ref().map(|p| p.expose_secret().as_str()),
            ),
            None => session.userauth_agent(user),
        };
        attempt.map_err(|e| self.auth_error(e))?;
        if !session.authenticated() {
            return Err(self.auth_error("server rejected credentials"));
        }
        tracing::debug!(host = %cfg.host, user, "ssh session ready");
        Ok(session)
    }

    fn exec_blocking(&self, command: &str) -> Result<CommandOutput> {
        let session = self.connect()?;
        exec_on(&session, command)
    }

    fn upload_blocking(&self, local: &Path, remote_dir: &str, scope: TransferScope) -> Result<u64> {
        let session = self.connect()?;
        match scope {
            TransferScope::Entry => send_entry(&session, local, remote_dir),
            TransferScope::VisibleContents => {
                let mut total = 0u64;
                for child in &visible_children(local)? {
                    total += send_entry(&session, child, remote_dir)?;
                }
                Ok(total)
            }
        }
    }
}

fn session_error(e: impl ToString) -> SyncError {
    SyncError::Session(e.to_string())
}

/// Sorted non-hidden children of `dir`; an unreadable entry is an error
fn visible_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !is_hidden(&entry.file_name()) {
            children.push(entry.path());
        }
    }
    children.sort();
    Ok(children)
}

fn exec_on(session: &Session, command: &str) -> Result<CommandOutput> {
    let mut channel = session.channel_session().map_err(session_error)?;
    channel.exec(command).map_err(session_error)?;

    // stdout and stderr share one window; read both or the server stalls
    session.set_blocking(false);
    let drained = drain(&mut channel.stream(0), &mut channel.stderr(), || channel.eof());
    session.set_blocking(true);
    let (stdout, stderr) = drained?;

    channel.wait_close().map_err(session_error)?;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status: channel.exit_status().map_err(session_error)?,
    })
}

const DRAIN_IDLE: Duration = Duration::from_millis(5);

/// Reads two non-blocking streams in turn until `at_eof` reports the remote
/// side is done and neither stream has anything left
fn drain<O: Read, E: Read>(
    out: &mut O,
    err: &mut E,
    at_eof: impl Fn() -> bool,
) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let got = read_some(out, &mut buf, &mut stdout)? + read_some(err, &mut buf, &mut stderr)?;
        if got == 0 {
            if at_eof() {
                return Ok((stdout, stderr));
            }
            std::thread::sleep(DRAIN_IDLE);
        }
    }
}

fn read_some<R: Read>(src: &mut R, buf: &mut [u8], into: &mut Vec<u8>) -> std::io::Result<usize> {
    match src.read(buf) {
        Ok(n) => {
            into.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

fn send_entry(session: &Session, local: &Path, remote_dir: &str) -> Result<u64> {
    let name = local
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SyncError::Transfer {
            path: local.to_path_buf(),
            reason: "file name is not valid UTF-8".into(),
        })?;
    let target = join_remote(remote_dir, name);

    if !fs::metadata(local)?.is_dir() {
        return send_file(session, local, &target);
    }

    let resolver = PathResolver::new(local);
    let mut bytes = 0u64;
    for entry in WalkDir::new(local).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| SyncError::Transfer {
            path: local.to_path_buf(),
            reason: e.to_string(),
        })?;
        let suffix = resolver.resolve(entry.path(), true)?.remote_suffix;
        let remote = join_remote(&target, &suffix);
        if entry.file_type().is_dir() {
            let mkdir = RemoteCommand::MakeDir(remote);
            let out = exec_on(session, &mkdir.to_shell())?;
            if !out.success() {
                return Err(SyncError::Transfer {
                    path: entry.path().to_path_buf(),
                    reason: out.stderr.trim().to_string(),
                });
            }
        } else if entry.file_type().is_file() {
            bytes += send_file(session, entry.path(), &remote)?;
        }
    }
    Ok(bytes)
}

fn send_file(session: &Session, local: &Path, remote: &str) -> Result<u64> {
    let failed = |reason: String| SyncError::Transfer {
        path: local.to_path_buf(),
        reason,
    };
    let mut file = File::open(local)?;
    let meta = file.metadata()?;
    let mut channel = session
        .scp_send(Path::new(remote), file_mode(&meta), meta.len(), None)
        .map_err(|e| failed(format!("scp to {remote}: {e}")))?;
    let sent = std::io::copy(&mut file, &mut channel).map_err(|e| failed(e.to_string()))?;
    channel.send_eof().map_err(|e| failed(e.to_string()))?;
    channel.wait_eof().map_err(|e| failed(e.to_string()))?;
    channel.close().map_err(|e| failed(e.to_string()))?;
    channel.wait_close().map_err(|e| failed(e.to_string()))?;
    tracing::debug!(local = %local.display(), remote, bytes = sent, "scp upload done");
    Ok(sent)
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> i32 {
    use std::os::unix::fs::PermissionsExt;
    (meta.permissions().mode() & 0o777) as i32
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> i32 {
    0o644
}

#[async_trait]
impl RemoteShell for SshTransport {
    async fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput> {
        let this = self.clone();
        let line = command.to_shell();
        tokio::task::spawn_blocking(move || this.exec_blocking(&line))
            .await
            .map_err(session_error)?
    }
}

#[async_trait]
impl FileTransfer for SshTransport {
    async fn upload(&self, local: &Path, remote_dir: &str, scope: TransferScope) -> Result<u64> {
        let this = self.clone();
        let local = local.to_path_buf();
        let remote_dir = remote_dir.to_string();
        tokio::task::spawn_blocking(move || this.upload_blocking(&local, &remote_dir, scope))
            .await
            .map_err(session_error)?
    }
}
