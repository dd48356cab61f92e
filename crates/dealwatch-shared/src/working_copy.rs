//! Working copy handle.
//!
//! Names the live root directory and the fixed set of managed paths that make
//! up "the program". Backup, staging and commit all go through this handle so
//! they operate over exactly the same set, and tests can point it at a
//! sandbox directory.

use crate::error::UpdateError;
use crate::version::VersionStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_VERSION_FILE: &str = "version.txt";
pub const DEFAULT_BACKUP_DIR: &str = "backup_versions";
pub const DEFAULT_STAGING_DIR: &str = "ota_update_tmp";

/// Suffix of the temporary sibling used by [`replace_file`]
const REPLACE_SUFFIX: &str = ".dwnew";

#[derive(Debug, Clone)]
pub struct WorkingCopy {
    root: PathBuf,
    managed: Vec<PathBuf>,
    version_file: PathBuf,
    backup_dir: PathBuf,
    staging_dir: PathBuf,
}

/// What an install from a staged candidate actually touched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    /// Managed paths overwritten from the candidate
    pub installed: Vec<PathBuf>,
    /// Managed paths the candidate did not contain
    pub missing: Vec<PathBuf>,
}

impl WorkingCopy {
    /// Create a handle. Managed paths must be relative and stay inside `root`.
    pub fn new<I, P>(root: impl AsRef<Path>, managed: I) -> Result<Self, UpdateError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let managed = managed
            .into_iter()
            .map(|p| validate_relative(p.into()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root: root.as_ref().to_path_buf(),
            managed,
            version_file: PathBuf::from(DEFAULT_VERSION_FILE),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
        })
    }

    pub fn with_version_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.version_file = path.into();
        self
    }

    pub fn with_backup_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_dir = path.into();
        self
    }

    pub fn with_staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_dir = path.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Managed paths, relative to the root
    pub fn managed(&self) -> &[PathBuf] {
        &self.managed
    }

    pub fn live_path(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.root.join(&self.backup_dir)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(&self.staging_dir)
    }

    pub fn version_store(&self) -> VersionStore {
        VersionStore::new(self.root.join(&self.version_file))
    }

    /// Whether `rel` is one of the managed paths
    pub fn is_managed(&self, rel: &Path) -> bool {
        self.managed.iter().any(|m| m == rel)
    }

    /// Overwrite every managed path with the staged candidate's copy.
    ///
    /// Each file is replaced through a rename so a running executable can be
    /// swapped. Paths absent from the candidate are reported, not skipped
    /// silently. The first I/O error aborts the install.
    pub fn install_from(&self, staged_root: &Path) -> Result<InstallReport, UpdateError> {
        let mut report = InstallReport::default();

        for rel in &self.managed {
            let src = staged_root.join(rel);
            if !src.is_file() {
                warn!("Candidate has no {}, leaving live copy as is", rel.display());
                report.missing.push(rel.clone());
                continue;
            }

            let dest = self.live_path(rel);
            replace_file(&src, &dest).map_err(|source| UpdateError::Install {
                path: rel.clone(),
                source,
            })?;
            debug!("Installed {}", rel.display());
            report.installed.push(rel.clone());
        }

        Ok(report)
    }
}

/// Replace `dest` with a copy of `src` via a temporary sibling and a rename.
pub fn replace_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(REPLACE_SUFFIX);
    let tmp = dest.with_file_name(tmp_name);

    fs::copy(src, &tmp)?;
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn validate_relative(path: PathBuf) -> Result<PathBuf, UpdateError> {
    if path.as_os_str().is_empty() {
        return Err(UpdateError::InvalidPath("empty path".to_string()));
    }
    // "./a/./b" is stored as "a/b" so it compares equal to walked snapshot paths
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            _ => return Err(UpdateError::InvalidPath(path.display().to_string())),
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(UpdateError::InvalidPath(path.display().to_string()));
    }
    Ok(normalized)
}
