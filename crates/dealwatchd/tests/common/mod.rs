//! Shared fixtures for the update integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use dealwatch_shared::{EventLog, UpdateError, WorkingCopy};
use dealwatchd::notifier::Notifier;
use dealwatchd::ota::{RemoteSource, SelfTest, UpdateEngine};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

pub const PASSING_SELF_TEST: &str = "echo 'self-test ok'\nexit 0\n";

pub const FAILING_SELF_TEST: &str = "\
echo 'running price checks'
echo 'AssertionError: expected 1299.99, got None' >&2
exit 1
";

/// Scripted remote: a fixed tip and the files a clone produces
pub struct FakeRemote {
    tip: Mutex<Result<String, String>>,
    files: Vec<(PathBuf, Vec<u8>)>,
    clone_error: Option<String>,
    probes: AtomicUsize,
    clones: AtomicUsize,
}

impl FakeRemote {
    pub fn at(tip: &str) -> Self {
        Self {
            tip: Mutex::new(Ok(tip.to_string())),
            files: Vec::new(),
            clone_error: None,
            probes: AtomicUsize::new(0),
            clones: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        let remote = Self::at("");
        *remote.tip.lock().unwrap() = Err("Could not resolve host: git.example.com".to_string());
        remote
    }

    pub fn with_file(mut self, rel: &str, contents: &str) -> Self {
        self.files.push((PathBuf::from(rel), contents.as_bytes().to_vec()));
        self
    }

    pub fn with_self_test(self, script: &str) -> Self {
        self.with_file("self_test.sh", script)
    }

    pub fn failing_clone(mut self, message: &str) -> Self {
        self.clone_error = Some(message.to_string());
        self
    }

    pub fn set_tip(&self, tip: &str) {
        *self.tip.lock().unwrap() = Ok(tip.to_string());
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn tip_revision(&self) -> Result<String, UpdateError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.tip.lock().unwrap().clone().map_err(UpdateError::Probe)
    }

    async fn clone_into(&self, dir: &Path) -> Result<(), UpdateError> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.clone_error {
            return Err(UpdateError::Clone(message.clone()));
        }
        for (rel, contents) in &self.files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, contents)?;
        }
        Ok(())
    }
}

/// Keeps every notification text in order
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

/// A live working copy in a temp dir, with the activity log kept outside it
pub struct Sandbox {
    dir: TempDir,
    pub working_copy: WorkingCopy,
    pub log: EventLog,
}

impl Sandbox {
    /// Live copy with `app.sh`, `config.toml` and no version marker
    pub fn new() -> Self {
        Self::with_managed(&["app.sh", "config.toml", "version.txt"])
    }

    pub fn with_managed(managed: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("live");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("app.sh"), "echo v1\n").unwrap();
        fs::write(root.join("config.toml"), "interval = 300\n").unwrap();

        let working_copy = WorkingCopy::new(&root, managed.iter().copied()).unwrap();
        let log = EventLog::new(dir.path().join("logs/activity_log.txt"));
        Self {
            dir,
            working_copy,
            log,
        }
    }

    pub fn root(&self) -> &Path {
        self.working_copy.root()
    }

    pub fn set_marker(&self, marker: &str) {
        self.working_copy.version_store().commit(marker).unwrap();
    }

    pub fn marker(&self) -> String {
        self.working_copy.version_store().current()
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root().join(rel)).ok()
    }

    /// Contents of every file under the live root
    pub fn tree(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(self.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(self.root()).unwrap().to_path_buf();
                (rel, fs::read(e.path()).unwrap())
            })
            .collect()
    }

    /// Contents of the managed files only
    pub fn managed_contents(&self) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
        self.working_copy
            .managed()
            .iter()
            .map(|rel| (rel.clone(), fs::read(self.root().join(rel)).ok()))
            .collect()
    }

    pub fn staging_exists(&self) -> bool {
        self.working_copy.staging_root().exists()
    }

    pub fn engine(&self, remote: Arc<FakeRemote>, notifier: Arc<RecordingNotifier>) -> UpdateEngine {
        let self_test = SelfTest {
            timeout: Duration::from_secs(10),
            ..SelfTest::default()
        };
        UpdateEngine::new(self.working_copy.clone(), remote, self_test, notifier, self.log.clone())
    }

    pub fn event_kinds(&self) -> Vec<String> {
        self.log
            .read_all()
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.kind)
            .collect()
    }
}
