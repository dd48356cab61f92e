//! Over-the-air self-update.
//!
//! Every tick probes the remote branch, stages a candidate, runs its
//! self-test and either commits it over the live copy or leaves the live
//! copy untouched. Restarting into a commit is the caller's job.

pub mod backup;
pub mod engine;
pub mod probe;
pub mod scheduler;
pub mod staging;
pub mod validation;

pub use backup::{BackupManager, Snapshot};
pub use engine::{CommitSuccess, TickOutcome, UpdateEngine, Updater};
pub use probe::{GitRemote, RemoteSource};
pub use scheduler::UpdateScheduler;
pub use staging::Staging;
pub use validation::{SelfTest, Verdict};

use crate::config::UpdateConfig;
use crate::notifier::Notifier;
use anyhow::Result;
use dealwatch_shared::EventLog;
use std::sync::Arc;

/// Wire a production engine from configuration
pub fn engine_from_config(config: &UpdateConfig, notifier: Arc<dyn Notifier>, log: EventLog) -> Result<UpdateEngine> {
    let working_copy = config.working_copy()?;
    let remote = GitRemote::new(&config.remote_url, &config.branch).with_timeout(config.git_timeout());
    let self_test = SelfTest {
        entry_point: config.self_test_entry.clone(),
        interpreter: config.self_test_interpreter.clone(),
        timeout: config.self_test_timeout(),
    };
    Ok(UpdateEngine::new(working_copy, Arc::new(remote), self_test, notifier, log))
}
