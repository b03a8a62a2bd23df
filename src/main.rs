//! mdeploy - mirror a local directory to a remote host over SSH

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mirror_deploy::cli::Args;
use mirror_deploy::config::{self, Config, DEFAULT_CONFIG_FILE};
use mirror_deploy::logger::{ConsoleStatus, StatusSink, Tee, TextLogger};
use mirror_deploy::prompt::{AlwaysYes, Confirmation, StdinPrompt};
use mirror_deploy::{deploy, Engine, Prepared};

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // 128 + SIGINT
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut sinks: Vec<Arc<dyn StatusSink>> = vec![Arc::new(ConsoleStatus)];
    if let Some(ref p) = args.log_file {
        match TextLogger::new(p) {
            Ok(l) => sinks.push(Arc::new(l)),
            Err(e) => tracing::warn!(path = %p.display(), error = %e, "log file unavailable"),
        }
    }
    let status: Arc<dyn StatusSink> = Arc::new(Tee(sinks));

    let config = build_config(&args, status.as_ref())?;
    if args.show_config {
        print!("{config}");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(run(args, config, status))
}

fn build_config(args: &Args, status: &dyn StatusSink) -> Result<Config> {
    let mut config = Config::default();
    let file = match &args.config {
        Some(p) => Some(p.clone()),
        None => Some(Path::new(DEFAULT_CONFIG_FILE).to_path_buf()).filter(|p| p.is_file()),
    };
    if let Some(path) = file {
        let table = config::load_file(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        config.apply_table(&table, status);
        tracing::debug!(path = %path.display(), "configuration file applied");
    }
    config.apply_table(&args.overrides(), status);
    config.report_missing(status);
    Ok(config)
}

async fn run(args: Args, config: Config, status: Arc<dyn StatusSink>) -> Result<()> {
    let engine = Engine::with_ssh(config, status.clone());

    if args.create_remote {
        engine.ensure_remote_dir().await?;
    }

    let confirm: Arc<dyn Confirmation> = if args.yes {
        Arc::new(AlwaysYes)
    } else {
        Arc::new(StdinPrompt)
    };

    if args.reload_only {
        let root = deploy::watch_root(&args.directory)?;
        return match engine.prepare(&root, args.reload_mode(), confirm).await? {
            Prepared::Ready { reload } => {
                if let Some(report) = reload {
                    tracing::info!(tasks = report.tasks, bytes = report.bytes, "reload finished");
                }
                Ok(())
            }
            Prepared::Cancelled => Ok(()),
        };
    }

    let summary = engine
        .auto_deploy(&args.directory, args.reload_mode(), confirm)
        .await?;
    tracing::info!(applied = summary.applied, failed = summary.failed, "done");
    Ok(())
}
