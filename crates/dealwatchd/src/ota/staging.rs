//! Staging Fetcher - materialise a candidate revision in an isolated directory.
//!
//! The staging directory is exclusively owned by one update attempt. It is
//! recreated empty before every fetch and removed at the end of the attempt,
//! whatever the outcome. Cleanup failures are logged and ignored.

use super::probe::RemoteSource;
use dealwatch_shared::UpdateError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Wipe the staging directory and clone the candidate into it.
    ///
    /// A clone failure is an error: the caller must treat it as "no staged
    /// candidate", never as "identical to current".
    pub async fn fetch(&self, source: &dyn RemoteSource) -> Result<(), UpdateError> {
        if self.dir.exists() {
            safe_delete(&self.dir);
        }
        fs::create_dir_all(&self.dir)?;

        info!("📥  Fetching candidate into {}", self.dir.display());
        source.clone_into(&self.dir).await
    }

    /// Remove the staging directory, tolerating failures
    pub fn discard(&self) {
        if self.dir.exists() {
            safe_delete(&self.dir);
        }
    }
}

/// Recursively delete `path`.
///
/// On failure, clears read-only permission bits throughout the tree and
/// retries once. Returns whether the path is gone.
pub fn safe_delete(path: &Path) -> bool {
    match fs::remove_dir_all(path) {
        Ok(()) => return true,
        Err(e) if e.kind() == ErrorKind::NotFound => return true,
        Err(e) => debug!("First delete of {} failed: {}, fixing permissions", path.display(), e),
    }

    make_writable(path);

    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Could not delete {}: {} (ignoring)", path.display(), e);
            false
        }
    }
}

// Parent directories are fixed before descending so their entries can be listed
fn make_writable(path: &Path) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }

    let mut perms = meta.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let extra = if meta.is_dir() { 0o700 } else { 0o200 };
        perms.set_mode(perms.mode() | extra);
    }
    #[cfg(not(unix))]
    {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
    }
    if let Err(e) = fs::set_permissions(path, perms) {
        debug!("chmod {} failed: {}", path.display(), e);
    }

    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable(&entry.path());
            }
        }
    }
}
