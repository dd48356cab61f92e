//! Backup Manager - timestamped snapshots of the managed file set.
//!
//! A snapshot is taken before every attempted mutation. Snapshots are never
//! edited after creation and never pruned. `restore_latest` is the only
//! rollback mechanism: it puts back the state from just before the most
//! recent mutation attempt.

use chrono::{DateTime, Utc};
use dealwatch_shared::{replace_file, EventLog, UpdateError, WorkingCopy};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const SNAPSHOT_PREFIX: &str = "backup_";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Attempts at disambiguating two snapshots created in the same millisecond
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackedUpFile {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Written next to the copied files in every snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub created_at: DateTime<Utc>,
    pub files: Vec<BackedUpFile>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub dir: PathBuf,
    pub manifest: SnapshotManifest,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    working_copy: WorkingCopy,
    log: EventLog,
}

impl BackupManager {
    pub fn new(working_copy: WorkingCopy, log: EventLog) -> Self {
        Self { working_copy, log }
    }

    /// Copy every existing managed file into a new snapshot directory.
    ///
    /// Missing files and individual copy failures are recorded in the
    /// manifest and do not fail the snapshot. Only failing to create the
    /// snapshot directory itself is an error.
    pub fn snapshot(&self) -> Result<Snapshot, UpdateError> {
        let backup_root = self.working_copy.backup_root();
        fs::create_dir_all(&backup_root)
            .map_err(|e| UpdateError::Backup(format!("{}: {}", backup_root.display(), e)))?;
        let dir = create_unique_dir(&backup_root)?;

        let mut manifest = SnapshotManifest {
            created_at: Utc::now(),
            files: Vec::new(),
            skipped: Vec::new(),
        };

        for rel in self.working_copy.managed() {
            let live = self.working_copy.live_path(rel);
            if !live.is_file() {
                manifest.skipped.push(SkippedFile {
                    path: rel.clone(),
                    reason: "not present".to_string(),
                });
                continue;
            }

            match copy_with_digest(&live, &dir.join(rel)) {
                Ok((size, sha256)) => manifest.files.push(BackedUpFile {
                    path: rel.clone(),
                    size,
                    sha256,
                }),
                Err(e) => {
                    warn!("Backup of {} failed: {}", rel.display(), e);
                    manifest.skipped.push(SkippedFile {
                        path: rel.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = write_manifest(&dir, &manifest) {
            warn!("Failed to write backup manifest in {}: {}", dir.display(), e);
        }

        info!(
            "🗂️  Backed up {} file(s) to {}",
            manifest.files.len(),
            dir.display()
        );
        self.log.record(
            "backup_created",
            json!({
                "folder": dir.display().to_string(),
                "files": manifest.files.len(),
                "skipped": manifest.skipped.iter().map(|s| s.path.display().to_string()).collect::<Vec<_>>(),
            }),
        );

        Ok(Snapshot { dir, manifest })
    }

    /// All snapshot directories, oldest first
    pub fn snapshots(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(self.working_copy.backup_root()) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter(|e| e.file_name().to_string_lossy().starts_with(SNAPSHOT_PREFIX))
            .map(|e| e.path())
            .collect();
        dirs.sort();
        dirs
    }

    pub fn latest(&self) -> Option<PathBuf> {
        self.snapshots().pop()
    }

    /// Copy every file of the newest snapshot back over the live copy.
    ///
    /// Returns the snapshot used, or `None` when there is none. Restoring is
    /// file by file and keeps going past failures; any failure is reported
    /// in the returned error after all files were attempted.
    pub fn restore_latest(&self) -> Result<Option<PathBuf>, UpdateError> {
        let Some(dir) = self.latest() else {
            info!("No backup snapshot to restore");
            self.log.record("restore_skipped", json!({"reason": "no snapshot"}));
            return Ok(None);
        };

        let mut restored = 0usize;
        let mut failures = Vec::new();

        for entry in WalkDir::new(&dir).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    failures.push(e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            if rel == Path::new(MANIFEST_FILE) {
                continue;
            }
            if !self.working_copy.is_managed(rel) {
                warn!("Snapshot holds unmanaged {}, not restoring it", rel.display());
                continue;
            }

            match replace_file(entry.path(), &self.working_copy.live_path(rel)) {
                Ok(()) => restored += 1,
                Err(e) => failures.push(format!("{}: {}", rel.display(), e)),
            }
        }

        if failures.is_empty() {
            info!("🔁  Restored {} file(s) from {}", restored, dir.display());
            self.log.record(
                "version_restored",
                json!({"backup_folder": dir.display().to_string(), "files": restored}),
            );
            Ok(Some(dir))
        } else {
            let error = failures.join("; ");
            self.log.record(
                "restore_failed",
                json!({"backup_folder": dir.display().to_string(), "error": error}),
            );
            Err(UpdateError::Backup(format!("restore incomplete: {}", error)))
        }
    }
}

/// Read the manifest of a snapshot directory
pub fn read_manifest(dir: &Path) -> Result<SnapshotManifest, UpdateError> {
    let content = fs::read_to_string(dir.join(MANIFEST_FILE))?;
    Ok(serde_json::from_str(&content)?)
}

fn write_manifest(dir: &Path, manifest: &SnapshotManifest) -> Result<(), UpdateError> {
    let content = serde_json::to_string_pretty(manifest)?;
    fs::write(dir.join(MANIFEST_FILE), content)?;
    Ok(())
}

fn create_unique_dir(backup_root: &Path) -> Result<PathBuf, UpdateError> {
    let base = format!("{}{}", SNAPSHOT_PREFIX, Utc::now().format("%Y%m%d-%H%M%S-%3f"));

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{}-{:02}", base, attempt)
        };
        let dir = backup_root.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(UpdateError::Backup(format!("{}: {}", dir.display(), e)));
            }
        }
    }

    Err(UpdateError::Backup(format!(
        "no free snapshot name under {}",
        backup_root.display()
    )))
}

fn copy_with_digest(src: &Path, dest: &Path) -> std::io::Result<(u64, String)> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let size = fs::copy(src, dest)?;
    let digest = Sha256::digest(fs::read(dest)?);
    Ok((size, hex::encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BackupManager, EventLog) {
        let dir = TempDir::new().unwrap();
        let wc = WorkingCopy::new(dir.path(), ["bin/agent", "agent.toml", "version.txt"]).unwrap();
        let log = EventLog::new(dir.path().join("logs/activity.jsonl"));
        let manager = BackupManager::new(wc, log.clone());
        (dir, manager, log)
    }

    #[test]
    fn test_snapshot_copies_existing_and_records_missing() {
        let (dir, manager, log) = setup();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/agent"), "binary").unwrap();
        fs::write(dir.path().join("version.txt"), "a1b2c3d").unwrap();

        let snapshot = manager.snapshot().unwrap();

        assert!(snapshot.dir.starts_with(dir.path().join("backup_versions")));
        assert_eq!(fs::read_to_string(snapshot.dir.join("bin/agent")).unwrap(), "binary");
        assert_eq!(fs::read_to_string(snapshot.dir.join("version.txt")).unwrap(), "a1b2c3d");
        assert!(!snapshot.dir.join("agent.toml").exists());

        let manifest = read_manifest(&snapshot.dir).unwrap();
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.skipped.len(), 1);
        assert_eq!(manifest.skipped[0].path, PathBuf::from("agent.toml"));
        assert_eq!(
            manifest.files[0].sha256,
            hex::encode(Sha256::digest(b"binary"))
        );

        assert_eq!(log.read_kind("backup_created").len(), 1);
    }

    #[test]
    fn test_snapshot_on_first_run_with_nothing_present() {
        let (_dir, manager, _log) = setup();
        let snapshot = manager.snapshot().unwrap();
        assert!(snapshot.manifest.files.is_empty());
        assert_eq!(snapshot.manifest.skipped.len(), 3);
    }

    #[test]
    fn test_snapshots_accumulate_and_sort() {
        let (dir, manager, _log) = setup();
        fs::write(dir.path().join("version.txt"), "one").unwrap();
        let first = manager.snapshot().unwrap();
        fs::write(dir.path().join("version.txt"), "two").unwrap();
        let second = manager.snapshot().unwrap();

        assert_ne!(first.dir, second.dir);
        assert_eq!(manager.snapshots(), vec![first.dir, second.dir.clone()]);
        assert_eq!(manager.latest(), Some(second.dir));
    }

    #[test]
    fn test_restore_latest_puts_back_newest_snapshot() {
        let (dir, manager, log) = setup();
        fs::write(dir.path().join("version.txt"), "old").unwrap();
        manager.snapshot().unwrap();
        fs::write(dir.path().join("version.txt"), "good").unwrap();
        fs::write(dir.path().join("agent.toml"), "good config").unwrap();
        manager.snapshot().unwrap();

        // Simulated partial overwrite
        fs::write(dir.path().join("version.txt"), "broken").unwrap();
        fs::write(dir.path().join("agent.toml"), "broken").unwrap();

        let used = manager.restore_latest().unwrap();
        assert_eq!(used, manager.latest());
        assert_eq!(fs::read_to_string(dir.path().join("version.txt")).unwrap(), "good");
        assert_eq!(fs::read_to_string(dir.path().join("agent.toml")).unwrap(), "good config");
        // The manifest is never copied into the live tree
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert_eq!(log.read_kind("version_restored").len(), 1);
    }

    #[test]
    fn test_restore_with_dot_prefixed_managed_entry() {
        let dir = TempDir::new().unwrap();
        let wc = WorkingCopy::new(dir.path(), ["./config.toml", "version.txt"]).unwrap();
        let log = EventLog::new(dir.path().join("logs/activity.jsonl"));
        let manager = BackupManager::new(wc, log.clone());

        fs::write(dir.path().join("config.toml"), "good\n").unwrap();
        manager.snapshot().unwrap();
        fs::write(dir.path().join("config.toml"), "broken\n").unwrap();

        assert!(manager.restore_latest().unwrap().is_some());
        assert_eq!(fs::read_to_string(dir.path().join("config.toml")).unwrap(), "good\n");
        let restored = log.read_kind("version_restored");
        assert_eq!(restored[0].data["files"], 1);
    }

    #[test]
    fn test_restore_without_snapshots_is_noop() {
        let (dir, manager, log) = setup();
        fs::write(dir.path().join("version.txt"), "live").unwrap();

        assert_eq!(manager.restore_latest().unwrap(), None);
        assert_eq!(fs::read_to_string(dir.path().join("version.txt")).unwrap(), "live");
        assert_eq!(log.read_kind("restore_skipped").len(), 1);
    }

    #[test]
    fn test_restore_ignores_unmanaged_files_in_snapshot() {
        let (dir, manager, _log) = setup();
        let snapshot = manager.snapshot().unwrap();
        fs::write(snapshot.dir.join("stray.txt"), "x").unwrap();

        manager.restore_latest().unwrap();
        assert!(!dir.path().join("stray.txt").exists());
    }

    #[test]
    fn test_snapshot_fails_when_backup_root_blocked() {
        let (dir, manager, _log) = setup();
        fs::write(dir.path().join("backup_versions"), "a file, not a dir").unwrap();
        assert!(matches!(manager.snapshot(), Err(UpdateError::Backup(_))));
    }
}
