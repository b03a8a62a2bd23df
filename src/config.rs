//! Deployment configuration
//!
//! A `Config` is built once at startup from an optional TOML file plus CLI
//! overrides, then handed by value to every component. Values arrive as a
//! loose key/value table so unknown or mistyped keys can be warned about and
//! skipped instead of aborting startup.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::logger::StatusSink;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);
pub const MAX_SETTLE_DELAY: Duration = Duration::from_secs(60);
/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "mdeploy.toml";

const KNOWN_KEYS: &[&str] = &[
    "host",
    "username",
    "password",
    "identity_file",
    "passphrase",
    "remote_path",
    "remotePath",
    "port",
    "settle_delay_secs",
    "command_timeout_secs",
    "verify",
];

/// How write access to the remote target is established
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VerifyStrategy {
    /// Inspect `ls -ld` output for an owner-writable directory
    Inspect,
    /// Upload and remove a marker file
    #[default]
    Probe,
}

#[derive(Clone, Debug)]
pub enum Credential {
    Password(SecretString),
    IdentityFile {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub username: String,
    /// `None` falls back to the SSH agent
    pub credential: Option<Credential>,
    remote_path: String,
    pub port: u16,
    settle_delay: Duration,
    /// `None` disables the per-command timeout
    pub command_timeout: Option<Duration>,
    pub verify: VerifyStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            credential: None,
            remote_path: String::new(),
            port: DEFAULT_PORT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            command_timeout: None,
            verify: VerifyStrategy::default(),
        }
    }
}

/// Keys that were dropped while applying a table
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigReport {
    pub unknown: Vec<String>,
    pub invalid: Vec<String>,
}

impl ConfigReport {
    pub fn is_clean(&self) -> bool {
        self.unknown.is_empty() && self.invalid.is_empty()
    }
}

impl Config {
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Stores the remote path without its trailing separator(s); `/` stays `/`
    pub fn set_remote_path(&mut self, path: &str) {
        let trimmed = path.trim().trim_end_matches('/');
        self.remote_path = if trimmed.is_empty() && path.trim().starts_with('/') {
            "/".to_string()
        } else {
            trimmed.to_string()
        };
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn set_settle_delay(&mut self, delay: Duration) {
        self.settle_delay = delay.min(MAX_SETTLE_DELAY);
    }

    /// Applies every known key from `table`, warning about the rest.
    ///
    /// Nothing here is fatal: unknown keys and values of the wrong type are
    /// reported through `status` and left out of the configuration.
    pub fn apply_table(&mut self, table: &toml::Table, status: &dyn StatusSink) -> ConfigReport {
        let mut report = ConfigReport::default();
        let mut password: Option<SecretString> = None;
        let mut identity: Option<PathBuf> = None;
        let mut passphrase: Option<SecretString> = None;

        for (key, value) in table {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                status.warn(&format!("Invalid key:'{key}' in Config"));
                tracing::warn!(key = %key, "ignoring unknown configuration key");
                report.unknown.push(key.clone());
                continue;
            }
            let applied = match key.as_str() {
                "host" => value.as_str().map(|s| self.host = s.to_string()),
                "username" => value.as_str().map(|s| self.username = s.to_string()),
                "password" => value
                    .as_str()
                    .map(|s| password = Some(SecretString::new(s.to_string()))),
                "identity_file" => value.as_str().map(|s| identity = Some(PathBuf::from(s))),
                "passphrase" => value
                    .as_str()
                    .map(|s| passphrase = Some(SecretString::new(s.to_string()))),
                "remote_path" | "remotePath" => value.as_str().map(|s| self.set_remote_path(s)),
                "port" => value
                    .as_integer()
                    .and_then(|p| u16::try_from(p).ok())
                    .map(|p| self.port = p),
                "settle_delay_secs" => as_seconds(value).map(|d| self.set_settle_delay(d)),
                "command_timeout_secs" => as_seconds(value).map(|d| {
                    self.command_timeout = if d.is_zero() { None } else { Some(d) }
                }),
                "verify" => VerifyStrategy::deserialize(value.clone())
                    .ok()
                    .map(|v| self.verify = v),
                _ => None,
            };
            if applied.is_none() {
                let err = SyncError::Configuration(format!("invalid value for '{key}': {value}"));
                status.error(&err.to_string());
                report.invalid.push(key.clone());
            }
        }

        if let Some(path) = identity {
            self.credential = Some(Credential::IdentityFile { path, passphrase });
        } else if let Some(secret) = password {
            self.credential = Some(Credential::Password(secret));
        }
        report
    }

    /// Names of required fields that are still empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.host.is_empty() {
            missing.push("host");
        }
        if self.username.is_empty() {
            missing.push("username");
        }
        if self.credential.is_none() {
            missing.push("password");
        }
        if self.remote_path.is_empty() {
            missing.push("remote_path");
        }
        missing
    }

    /// Reports each missing field; startup continues regardless
    pub fn report_missing(&self, status: &dyn StatusSink) -> usize {
        let missing = self.missing_fields();
        for field in &missing {
            status.error(&format!("Config is missing {field}"));
        }
        missing.len()
    }
}

fn as_seconds(value: &toml::Value) -> Option<Duration> {
    match value {
        toml::Value::Integer(i) if *i >= 0 => Some(Duration::from_secs(*i as u64)),
        toml::Value::Float(f) if *f >= 0.0 && f.is_finite() => {
            Some(Duration::from_secs_f64(f.min(u32::MAX as f64)))
        }
        _ => None,
    }
}

/// Reads a TOML configuration file into a raw table
pub fn load_file(path: &Path) -> Result<toml::Table> {
    let text = std::fs::read_to_string(path)?;
    text.parse::<toml::Table>()
        .map_err(|e| SyncError::Configuration(format!("{}: {e}", path.display())))
}

/// Redacted rendering; the credential never leaves the process
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "host        = {:?}", self.host)?;
        writeln!(f, "port        = {}", self.port)?;
        writeln!(f, "username    = {:?}", self.username)?;
        let cred = match &self.credential {
            Some(Credential::Password(p)) if !p.expose_secret().is_empty() => "password (********)".to_string(),
            Some(Credential::Password(_)) => "password (empty)".to_string(),
            Some(Credential::IdentityFile { path, .. }) => format!("identity file {}", path.display()),
            None => "ssh agent".to_string(),
        };
        writeln!(f, "credential  = {cred}")?;
        writeln!(f, "remote_path = {:?}", self.remote_path)?;
        writeln!(f, "verify      = {:?}", self.verify)?;
        writeln!(f, "settle      = {:?}", self.settle_delay)?;
        match self.command_timeout {
            Some(t) => write!(f, "timeout     = {t:?}"),
            None => write!(f, "timeout     = none"),
        }
    }
}
