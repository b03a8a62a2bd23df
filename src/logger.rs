//! Operator-facing status lines
//!
//! Every engine outcome ends up here as one tagged line. The console sink
//! colors them, the text sink appends them to a file with a timestamp.

use anyhow::Result;
use chrono::Utc;
use crossterm::style::Stylize;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Prefix of every console status line
pub const TAG: &str = "[MD]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warn,
    Success,
    Error,
}

impl StatusLevel {
    pub fn label(self) -> &'static str {
        match self {
            StatusLevel::Info => "INFO",
            StatusLevel::Warn => "WARN",
            StatusLevel::Success => "OK",
            StatusLevel::Error => "ERROR",
        }
    }
}

pub trait StatusSink: Send + Sync {
    fn line(&self, _level: StatusLevel, _msg: &str) {}

    fn info(&self, msg: &str) {
        self.line(StatusLevel::Info, msg);
    }
    fn warn(&self, msg: &str) {
        self.line(StatusLevel::Warn, msg);
    }
    fn success(&self, msg: &str) {
        self.line(StatusLevel::Success, msg);
    }
    fn error(&self, msg: &str) {
        self.line(StatusLevel::Error, msg);
    }
}

pub struct NoopStatus;
impl StatusSink for NoopStatus {}

/// Colored `[MD] ~ message` lines on stdout
pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn line(&self, level: StatusLevel, msg: &str) {
        let tag = format!("{} ~ ", TAG.bold());
        let body = match level {
            StatusLevel::Info => msg.to_string(),
            StatusLevel::Warn => msg.yellow().to_string(),
            StatusLevel::Success => msg.green().bold().to_string(),
            StatusLevel::Error => format!("ERROR: {msg}").red().bold().to_string(),
        };
        println!("{tag}{body}");
    }
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }
}

impl StatusSink for TextLogger {
    fn line(&self, level: StatusLevel, msg: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {} {}", Utc::now().to_rfc3339(), level.label(), msg);
    }
}

/// Fans each line out to several sinks
pub struct Tee(pub Vec<Arc<dyn StatusSink>>);

impl StatusSink for Tee {
    fn line(&self, level: StatusLevel, msg: &str) {
        for sink in &self.0 {
            sink.line(level, msg);
        }
    }
}

/// Keeps lines in memory; used by embedders that render status themselves
#[derive(Default)]
pub struct RecordingStatus {
    lines: Mutex<Vec<(StatusLevel, String)>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(StatusLevel, String)> {
        self.lines.lock().clone()
    }

    pub fn count(&self, level: StatusLevel) -> usize {
        self.lines.lock().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn contains(&self, level: StatusLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl StatusSink for RecordingStatus {
    fn line(&self, level: StatusLevel, msg: &str) {
        self.lines.lock().push((level, msg.to_string()));
    }
}
