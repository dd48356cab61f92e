//! Shared types for the dealwatch agent.
//!
//! Everything here is filesystem-level plumbing that both the daemon and its
//! integration tests build on: the version marker, the working copy handle,
//! the structured activity log and the update error taxonomy.

pub mod error;
pub mod event_log;
pub mod version;
pub mod working_copy;

pub use error::UpdateError;
pub use event_log::{EventLog, EventRecord};
pub use version::{BuildInfo, VersionStore, UNKNOWN_VERSION, VERSION};
pub use working_copy::{replace_file, InstallReport, WorkingCopy};
