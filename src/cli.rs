//! Command-line surface

use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::VerifyStrategy;
use crate::deploy::ReloadMode;

/// Mirror a local directory to a remote host over SSH
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Local directory to mirror
    pub directory: PathBuf,

    /// TOML configuration file (defaults to ./mdeploy.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Remote host
    #[arg(long)]
    pub host: Option<String>,

    /// SSH port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Remote user
    #[arg(short, long = "user")]
    pub username: Option<String>,

    /// Password (prefer the environment variable over the flag)
    #[arg(long, env = "MDEPLOY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Private key used instead of a password
    #[arg(short, long)]
    pub identity_file: Option<PathBuf>,

    /// Remote directory that mirrors the local one
    #[arg(short, long)]
    pub remote_path: Option<String>,

    /// How to verify write access
    #[arg(long, value_enum)]
    pub verify: Option<VerifyStrategy>,

    /// Wipe the remote directory and upload everything before watching
    #[arg(long)]
    pub reload: bool,

    /// Reload, then exit instead of watching
    #[arg(long, conflicts_with = "reload")]
    pub reload_only: bool,

    /// Do not ask before reloading
    #[arg(short, long)]
    pub yes: bool,

    /// Create the remote directory if it does not exist
    #[arg(long)]
    pub create_remote: bool,

    /// Seconds to wait before clearing the remote directory
    #[arg(long, value_name = "SECS")]
    pub settle_delay: Option<f64>,

    /// Per-command timeout in seconds (0 = none)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Append status lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Print the effective configuration (credentials redacted)
    #[arg(long)]
    pub show_config: bool,

    /// More diagnostics (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Flags given on the command line, as configuration keys
    pub fn overrides(&self) -> toml::Table {
        let mut t = toml::Table::new();
        let mut put = |key: &str, value: toml::Value| {
            t.insert(key.to_string(), value);
        };
        if let Some(h) = &self.host {
            put("host", h.clone().into());
        }
        if let Some(p) = self.port {
            put("port", i64::from(p).into());
        }
        if let Some(u) = &self.username {
            put("username", u.clone().into());
        }
        if let Some(pw) = &self.password {
            put("password", pw.clone().into());
        }
        if let Some(k) = &self.identity_file {
            put("identity_file", k.to_string_lossy().into_owned().into());
        }
        if let Some(r) = &self.remote_path {
            put("remote_path", r.clone().into());
        }
        if let Some(v) = self.verify {
            let name = match v {
                VerifyStrategy::Inspect => "inspect",
                VerifyStrategy::Probe => "probe",
            };
            put("verify", name.into());
        }
        if let Some(s) = self.settle_delay {
            put("settle_delay_secs", s.into());
        }
        if let Some(s) = self.timeout {
            put("command_timeout_secs", (s.min(i64::MAX as u64) as i64).into());
        }
        t
    }

    pub fn reload_mode(&self) -> ReloadMode {
        match (self.reload || self.reload_only, self.yes) {
            (false, _) => ReloadMode::Skip,
            (true, false) => ReloadMode::Confirm,
            (true, true) => ReloadMode::Force,
        }
    }

    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "mirror_deploy=debug,mdeploy=debug",
            _ => "trace",
        }
    }
}
