//! dealwatchd - self-updating listing monitor agent
//!
//! Runs the listing monitor and chat command poller on the main runtime and
//! the self-updater on its own thread. When the updater commits a new
//! version, everything is stopped and the process re-executes itself.

use anyhow::{Context, Result};
use clap::Parser;
use dealwatch_shared::{BuildInfo, EventLog};
use dealwatchd::commands::CommandPoller;
use dealwatchd::config::Config;
use dealwatchd::monitor::ListingMonitor;
use dealwatchd::notifier::{notifier_for, Notifier};
use dealwatchd::ota::{self, CommitSuccess, TickOutcome, UpdateScheduler, Updater};
use dealwatchd::restart;
use dealwatchd::telegram::TelegramClient;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "dealwatchd", version, about = "Self-updating listing monitor agent")]
struct Cli {
    /// Config file (default: ./dealwatch.toml, then /etc/dealwatch/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single update check and exit
    #[arg(long)]
    once: bool,

    /// Do not start the listing monitor
    #[arg(long)]
    no_monitor: bool,

    /// Log notifications instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Write a default config file to PATH and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.init_config {
        return Config::save_default(path);
    }

    let config = Config::load(cli.config.as_deref());
    let log = EventLog::new(config.activity_log_path());

    info!("[BOOT] dealwatchd {} starting", BuildInfo::current());

    if cli.once {
        return run_once(&config, cli.dry_run, log).await;
    }

    let notifier = notifier_for(&config.telegram, cli.dry_run, log.clone());
    let versions = config.update.working_copy()?.version_store();

    log.record(
        "agent_started",
        json!({"build": BuildInfo::current().to_string(), "version": versions.current()}),
    );
    notifier.notify("✅ Agent started.").await;

    let cancel = CancellationToken::new();
    let (commit_tx, commit_rx) = oneshot::channel::<CommitSuccess>();

    let updater = if updates_configured(&config) {
        let handle = spawn_updater(
            config.clone(),
            Arc::clone(&notifier),
            log.clone(),
            cancel.clone(),
            commit_tx,
        )
        .context("Failed to start updater thread")?;
        Some(handle)
    } else {
        None
    };

    let mut tasks = Vec::new();

    if config.monitor.enabled && !cli.no_monitor {
        let monitor = ListingMonitor::new(config.monitor.clone(), Arc::clone(&notifier), log.clone());
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { monitor.run(token).await }));
    } else {
        info!("Listing monitor disabled");
    }

    if config.telegram.has_credentials() && !cli.dry_run {
        let poller = CommandPoller::new(TelegramClient::new(&config.telegram), versions);
        tasks.push(tokio::spawn(poller.run(cancel.clone())));
    }

    info!("[READY] dealwatchd operational");

    // A dropped sender means the updater stopped without a commit
    let committed = async move {
        match commit_rx.await {
            Ok(commit) => commit,
            Err(_) => std::future::pending().await,
        }
    };

    let commit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down gracefully");
            None
        }
        commit = committed => Some(commit),
    };

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    if let Some(handle) = updater {
        // Lets an in-flight transaction finish before the process goes away
        let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    }

    match commit {
        Some(commit) => {
            let err = restart::reexec(&commit);
            error!("Restart into {} failed: {}", commit.to, err);
            Err(err).context("Failed to re-execute after update")
        }
        None => Ok(()),
    }
}

fn updates_configured(config: &Config) -> bool {
    if !config.update.enabled {
        info!("Self-update disabled");
        return false;
    }
    if config.update.remote_url.is_empty() {
        warn!("update.remote_url not set, self-update disabled");
        return false;
    }
    true
}

/// Run the update scheduler on a dedicated thread with its own runtime, so
/// clones and self-tests never compete with the monitor for workers.
fn spawn_updater(
    config: Config,
    notifier: Arc<dyn Notifier>,
    log: EventLog,
    cancel: CancellationToken,
    commit_tx: oneshot::Sender<CommitSuccess>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("ota-updater".to_string()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to build updater runtime: {}", e);
                return;
            }
        };

        runtime.block_on(async move {
            let engine = match ota::engine_from_config(&config.update, Arc::clone(&notifier), log.clone()) {
                Ok(engine) => engine,
                Err(e) => {
                    error!("Self-update not started: {:#}", e);
                    return;
                }
            };

            let scheduler = UpdateScheduler::new(Arc::new(engine), config.update.interval(), notifier, log);
            if let Some(commit) = scheduler.run(cancel).await {
                let _ = commit_tx.send(commit);
            }
        });
    })
}

async fn run_once(config: &Config, dry_run: bool, log: EventLog) -> Result<()> {
    if config.update.remote_url.is_empty() {
        anyhow::bail!("update.remote_url is not set");
    }

    let notifier = notifier_for(&config.telegram, dry_run, log.clone());
    let engine = ota::engine_from_config(&config.update, notifier, log)?;

    match engine.tick().await? {
        TickOutcome::NoOp { version } => println!("Up to date ({})", version),
        TickOutcome::Rejected { version, reason, .. } => println!("Rejected {}: {}", version, reason),
        TickOutcome::Aborted { version, error, restored } => {
            println!("Update to {} aborted: {}", version, error);
            if let Some(dir) = restored {
                println!("Restored from {}", dir.display());
            }
        }
        TickOutcome::Applied(commit) => {
            println!("Applied {} -> {}", commit.from, commit.to);
            let err = restart::reexec(&commit);
            return Err(err).context("Failed to re-execute after update");
        }
    }
    Ok(())
}
