//! Update Scheduler - drive the engine on a fixed interval.
//!
//! Ticks are serialized: the next one starts only after the previous has
//! finished plus one interval. Each tick runs in its own task, so an error or
//! a panic inside a tick is reported and the loop keeps going.

use super::engine::{CommitSuccess, TickOutcome, Updater};
use crate::notifier::Notifier;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use dealwatch_shared::EventLog;

pub struct UpdateScheduler<U: Updater + 'static> {
    updater: Arc<U>,
    interval: Duration,
    notifier: Arc<dyn Notifier>,
    log: EventLog,
}

impl<U: Updater + 'static> UpdateScheduler<U> {
    pub fn new(updater: Arc<U>, interval: Duration, notifier: Arc<dyn Notifier>, log: EventLog) -> Self {
        Self {
            updater,
            interval,
            notifier,
            log,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one tick. Returns the commit if the tick applied an update.
    pub async fn tick_once(&self) -> Option<CommitSuccess> {
        let updater = Arc::clone(&self.updater);
        let joined = tokio::spawn(async move { updater.tick().await }).await;

        let error = match joined {
            Ok(Ok(TickOutcome::Applied(commit))) => return Some(commit),
            Ok(Ok(outcome)) => {
                debug!("Update tick finished: {}", outcome.label());
                return None;
            }
            Ok(Err(e)) => e.to_string(),
            Err(join_err) if join_err.is_panic() => format!("update tick panicked: {}", panic_message(join_err)),
            Err(join_err) => format!("update tick did not complete: {}", join_err),
        };

        error!("❌  Update check failed: {}", error);
        self.notifier
            .notify(&format!("❌ Unrecoverable error in update check loop: {}", error))
            .await;
        self.log.record("update_loop_error", json!({"error": error}));
        None
    }

    /// Tick until an update is committed or `cancel` fires.
    ///
    /// The first tick runs immediately. The returned commit is for the caller
    /// to restart into; the scheduler itself stops after it.
    pub async fn run(&self, cancel: CancellationToken) -> Option<CommitSuccess> {
        info!("🔄  Update scheduler started (every {}s)", self.interval.as_secs());

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Some(commit) = self.tick_once().await {
                info!("Update {} -> {} committed, handing over for restart", commit.from, commit.to);
                return Some(commit);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Update scheduler stopped");
        None
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
