//! Apply/Rollback Engine - one update transaction per scheduler tick.
//!
//! ```text
//! IDLE -> DETECTED -> STAGED -> VALIDATED -> COMMITTED   (Applied)
//! IDLE -> DETECTED -> STAGED -> REJECTED                  (Rejected)
//! IDLE -> ... -> FAILED -> ROLLED_BACK                    (Aborted)
//! ```
//!
//! The engine never restarts the process. A successful commit is handed back
//! as [`CommitSuccess`] and the supervisor in `main` performs the re-exec.

use super::backup::BackupManager;
use super::probe::{self, RemoteSource};
use super::staging::Staging;
use super::validation::{SelfTest, Verdict};
use crate::notifier::Notifier;
use async_trait::async_trait;
use dealwatch_shared::version::is_unknown;
use dealwatch_shared::{EventLog, UpdateError, VersionStore, WorkingCopy};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A committed update, waiting for the supervisor to restart into it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSuccess {
    pub from: String,
    pub to: String,
    pub installed: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

/// Exactly one per tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Remote equals local, or the remote could not be resolved
    NoOp { version: String },
    Applied(CommitSuccess),
    /// Validation failed; the live copy was never touched
    Rejected {
        version: String,
        reason: String,
        diagnostic: String,
    },
    /// Unexpected failure mid-transaction; `restored` is the snapshot put back
    Aborted {
        version: String,
        error: String,
        restored: Option<PathBuf>,
    },
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::NoOp { .. } => "no-op",
            TickOutcome::Applied(_) => "applied",
            TickOutcome::Rejected { .. } => "rejected",
            TickOutcome::Aborted { .. } => "aborted",
        }
    }
}

/// Anything the scheduler can drive
#[async_trait]
pub trait Updater: Send + Sync {
    async fn tick(&self) -> Result<TickOutcome, UpdateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Detected,
    BackedUp,
    Staged,
    Validated,
    Committed,
}

impl TxState {
    fn as_str(self) -> &'static str {
        match self {
            TxState::Detected => "detected",
            TxState::BackedUp => "backed_up",
            TxState::Staged => "staged",
            TxState::Validated => "validated",
            TxState::Committed => "committed",
        }
    }
}

/// Progress of one attempt, kept for the failure path
struct Transaction {
    attempt: String,
    from: String,
    to: String,
    state: TxState,
    snapshot: Option<PathBuf>,
}

pub struct UpdateEngine {
    working_copy: WorkingCopy,
    versions: VersionStore,
    source: Arc<dyn RemoteSource>,
    self_test: SelfTest,
    backups: BackupManager,
    staging: Staging,
    notifier: Arc<dyn Notifier>,
    log: EventLog,
}

impl UpdateEngine {
    pub fn new(
        working_copy: WorkingCopy,
        source: Arc<dyn RemoteSource>,
        self_test: SelfTest,
        notifier: Arc<dyn Notifier>,
        log: EventLog,
    ) -> Self {
        Self {
            versions: working_copy.version_store(),
            backups: BackupManager::new(working_copy.clone(), log.clone()),
            staging: Staging::new(working_copy.staging_root()),
            working_copy,
            source,
            self_test,
            notifier,
            log,
        }
    }

    pub fn working_copy(&self) -> &WorkingCopy {
        &self.working_copy
    }

    /// Steps 2-5. Any error returned here goes through the failure path.
    async fn apply(&self, tx: &mut Transaction) -> Result<TickOutcome, UpdateError> {
        let snapshot = self.backups.snapshot()?;
        tx.snapshot = Some(snapshot.dir);
        tx.state = TxState::BackedUp;

        self.staging.fetch(self.source.as_ref()).await?;
        tx.state = TxState::Staged;

        if let Verdict::Fail { reason, diagnostic } = self.self_test.validate(self.staging.path()).await {
            self.staging.discard();
            warn!("Candidate {} rejected: {}", tx.to, reason);
            self.notifier
                .notify(&format!(
                    "❌ Self-test for version {} failed ({}). Update not applied.\n\nError:\n{}",
                    tx.to, reason, diagnostic
                ))
                .await;
            self.log.record(
                "update_rejected",
                json!({
                    "attempt": tx.attempt,
                    "version": tx.to,
                    "reason": reason,
                    "error": diagnostic,
                }),
            );
            return Ok(TickOutcome::Rejected {
                version: tx.to.clone(),
                reason,
                diagnostic,
            });
        }
        tx.state = TxState::Validated;

        let report = self.working_copy.install_from(self.staging.path())?;
        self.versions.commit(&tx.to)?;
        tx.state = TxState::Committed;
        self.staging.discard();

        info!("✅  Updated {} -> {}", tx.from, tx.to);
        self.notifier
            .notify(&format!("✅ Update to {} applied. Restarting agent...", tx.to))
            .await;
        self.log.record(
            "update_applied",
            json!({
                "attempt": tx.attempt,
                "status": "success",
                "old_version": tx.from,
                "new_version": tx.to,
                "installed": report.installed,
                "missing": report.missing,
            }),
        );

        Ok(TickOutcome::Applied(CommitSuccess {
            from: tx.from.clone(),
            to: tx.to.clone(),
            installed: report.installed,
            missing: report.missing,
        }))
    }

    /// Step 6: notify, record, restore, clean up. Never restarts.
    async fn abort(&self, tx: Transaction, err: UpdateError) -> TickOutcome {
        error!("❌  Update to {} failed while {}: {}", tx.to, tx.state.as_str(), err);
        self.staging.discard();

        self.notifier
            .notify(&format!("❌ Critical error during update to {}: {}", tx.to, err))
            .await;
        self.log.record(
            "update_failed_critical",
            json!({
                "attempt": tx.attempt,
                "state": tx.state.as_str(),
                "error_kind": err.kind(),
                "error": err.to_string(),
                "old_version": tx.from,
                "new_version": tx.to,
            }),
        );

        // Without this attempt's snapshot nothing was mutated, and the newest
        // snapshot on disk would belong to an older attempt
        let restored = if tx.snapshot.is_some() {
            match self.backups.restore_latest() {
                Ok(dir) => dir,
                Err(e) => {
                    error!("Restore after failed update incomplete: {}", e);
                    None
                }
            }
        } else {
            warn!("No snapshot taken in this attempt, skipping restore");
            None
        };

        TickOutcome::Aborted {
            version: tx.to,
            error: err.to_string(),
            restored,
        }
    }
}

#[async_trait]
impl Updater for UpdateEngine {
    async fn tick(&self) -> Result<TickOutcome, UpdateError> {
        let current = self.versions.current();
        let remote = probe::remote_revision(self.source.as_ref(), &current, &self.log).await;

        if remote == current || is_unknown(&remote) {
            debug!("No update available (local {}, remote {})", current, remote);
            return Ok(TickOutcome::NoOp { version: current });
        }

        let mut tx = Transaction {
            attempt: Uuid::new_v4().to_string(),
            from: current,
            to: remote,
            state: TxState::Detected,
            snapshot: None,
        };

        info!("🔄  Updating from {} to {}", tx.from, tx.to);
        self.notifier
            .notify(&format!("🔄 New version detected: {}. Testing update...", tx.to))
            .await;
        self.log.record(
            "update_detected",
            json!({"attempt": tx.attempt, "old_version": tx.from, "new_version": tx.to}),
        );

        match self.apply(&mut tx).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => Ok(self.abort(tx, err).await),
        }
    }
}
