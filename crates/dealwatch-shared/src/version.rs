//! Version marker store and build identity.
//!
//! The marker is a single-line file holding the short revision the working
//! copy was last committed at. A missing, unreadable or empty marker reads as
//! [`UNKNOWN_VERSION`], which never equals a real revision, so the first run
//! always attempts an update.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Crate version, single source of truth for `--version` output
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sentinel for "no known revision"
pub const UNKNOWN_VERSION: &str = "0.0.0";

/// Reads and writes the version marker file
#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted marker, or the sentinel. Never fails.
    pub fn current(&self) -> String {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let marker = content.trim();
                if marker.is_empty() {
                    UNKNOWN_VERSION.to_string()
                } else {
                    marker.to_string()
                }
            }
            Err(_) => UNKNOWN_VERSION.to_string(),
        }
    }

    /// Overwrite the marker with a single full-file write
    pub fn commit(&self, marker: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, marker)
    }
}

/// Whether a marker is the "no known revision" sentinel
pub fn is_unknown(marker: &str) -> bool {
    marker == UNKNOWN_VERSION || marker.eq_ignore_ascii_case("unknown")
}

/// Build identity baked in at compile time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    pub git_sha: String,
    pub build_date: String,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION.to_string(),
            git_sha: env!("DEALWATCH_GIT_SHA").to_string(),
            build_date: env!("DEALWATCH_BUILD_DATE").to_string(),
        }
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({}, {})", self.version, self.git_sha, self.build_date)
    }
}
