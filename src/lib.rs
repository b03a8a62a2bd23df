//! Mirror Deploy Library
//!
//! Keeps a remote directory in step with a local one over SSH: verify write
//! access, optionally wipe and re-upload everything, then replay local
//! filesystem events as remote operations.

pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod logger;
pub mod mapper;
pub mod path_map;
pub mod permissions;
pub mod prompt;
pub mod reload;
pub mod remote_cmd;
pub mod ssh;
pub mod transport;
pub mod watcher;

pub use config::Config;
pub use deploy::{Engine, Prepared, ReloadMode, WatchSummary};
pub use error::{Result, SyncError};
