//! Remote Probe - resolve the remote branch tip without touching local state.
//!
//! The remote is behind the [`RemoteSource`] trait so the engine can be
//! driven by a scripted fake in tests. [`GitRemote`] is the production
//! implementation on top of the `git` binary.

use async_trait::async_trait;
use dealwatch_shared::{EventLog, UpdateError};
use serde_json::json;
use std::ffi::OsString;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Length of the short revision id used as version marker
pub const SHORT_REV_LEN: usize = 7;

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Short id of the tracked branch tip
    async fn tip_revision(&self) -> Result<String, UpdateError>;

    /// Shallow single-branch clone into an existing empty directory
    async fn clone_into(&self, dir: &Path) -> Result<(), UpdateError>;
}

/// A branch of a git remote
#[derive(Debug, Clone)]
pub struct GitRemote {
    url: String,
    branch: String,
    timeout: Option<Duration>,
}

impl GitRemote {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
            timeout: None,
        }
    }

    /// Bound every git invocation; the child is killed when it expires
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_git(&self, args: Vec<OsString>) -> Result<Output, String> {
        debug!("git {:?}", args);
        let mut cmd = Command::new("git");
        cmd.args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| format!("git timed out after {}s", limit.as_secs()))?,
            None => cmd.output().await,
        };
        output.map_err(|e| format!("failed to run git: {}", e))
    }
}

#[async_trait]
impl RemoteSource for GitRemote {
    async fn tip_revision(&self) -> Result<String, UpdateError> {
        let output = self
            .run_git(vec![
                "ls-remote".into(),
                self.url.clone().into(),
                format!("refs/heads/{}", self.branch).into(),
            ])
            .await
            .map_err(UpdateError::Probe)?;

        if !output.status.success() {
            return Err(UpdateError::Probe(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ls_remote(&stdout, &self.branch).ok_or_else(|| {
            UpdateError::Probe(format!("branch {} not found on remote", self.branch))
        })
    }

    async fn clone_into(&self, dir: &Path) -> Result<(), UpdateError> {
        let output = self
            .run_git(vec![
                "clone".into(),
                "--depth".into(),
                "1".into(),
                "--single-branch".into(),
                "--branch".into(),
                self.branch.clone().into(),
                self.url.clone().into(),
                dir.as_os_str().to_os_string(),
            ])
            .await
            .map_err(UpdateError::Clone)?;

        if !output.status.success() {
            return Err(UpdateError::Clone(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Extract the short hash of `refs/heads/<branch>` from `git ls-remote` output
pub fn parse_ls_remote(stdout: &str, branch: &str) -> Option<String> {
    let wanted = format!("refs/heads/{}", branch);
    stdout
        .lines()
        .find_map(|line| {
            let mut parts = line.split_whitespace();
            let hash = parts.next()?;
            let reference = parts.next()?;
            (reference == wanted).then_some(hash)
        })
        .filter(|hash| hash.len() >= SHORT_REV_LEN && hash.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|hash| hash[..SHORT_REV_LEN].to_lowercase())
}

/// The remote revision, or `current` when the remote cannot be reached.
///
/// Falling back to the local marker makes a failed probe indistinguishable
/// from "no update available".
pub async fn remote_revision(source: &dyn RemoteSource, current: &str, log: &EventLog) -> String {
    match source.tip_revision().await {
        Ok(revision) => revision,
        Err(e) => {
            warn!("Remote probe failed, assuming no update: {}", e);
            log.record("remote_probe_failed", json!({"error": e.to_string()}));
            current.to_string()
        }
    }
}
