//! Validation Runner - run the candidate's own self-test out of process.
//!
//! Candidate code is never loaded into the agent: the self-test runs as a
//! child process inside the staged copy, so a broken candidate can at worst
//! fail its own test. A candidate without a self-test is never trusted.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

pub const DEFAULT_ENTRY_POINT: &str = "self_test.sh";
pub const DEFAULT_INTERPRETER: &str = "sh";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Outcome of validating a staged candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail {
        reason: String,
        /// Captured stderr + stdout, or the launch error text
        diagnostic: String,
    },
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    fn fail(reason: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Verdict::Fail {
            reason: reason.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

/// How to run a candidate's self-test
#[derive(Debug, Clone)]
pub struct SelfTest {
    /// File name at the root of the staged copy
    pub entry_point: String,
    /// Program used to run the entry point; empty runs it directly
    pub interpreter: String,
    pub timeout: Duration,
}

impl Default for SelfTest {
    fn default() -> Self {
        Self {
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SelfTest {
    /// Run the self-test inside `staged_dir`. Exit code 0 passes; anything
    /// else, a timeout or a launch error fails.
    pub async fn validate(&self, staged_dir: &Path) -> Verdict {
        if !staged_dir.join(&self.entry_point).is_file() {
            warn!("Candidate has no {}", self.entry_point);
            return Verdict::fail(
                format!("no self-test present ({} missing)", self.entry_point),
                "",
            );
        }

        let mut cmd = if self.interpreter.is_empty() {
            Command::new(Path::new(".").join(&self.entry_point))
        } else {
            let mut cmd = Command::new(&self.interpreter);
            cmd.arg(&self.entry_point);
            cmd
        };
        cmd.current_dir(staged_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("🧪  Running self-test {} (timeout {}s)", self.entry_point, self.timeout.as_secs());

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return Verdict::fail("self-test could not be started", e.to_string()),
        };

        // Dropping the future on timeout kills the child
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => Verdict::fail(
                format!("self-test timed out after {}s", self.timeout.as_secs()),
                "",
            ),
            Ok(Err(e)) => Verdict::fail("self-test failed to run", e.to_string()),
            Ok(Ok(output)) if output.status.success() => Verdict::Pass,
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stdout = String::from_utf8_lossy(&output.stdout);
                Verdict::fail(
                    format!("self-test exited with {}", output.status),
                    format!("{}\n{}", stderr.trim_end(), stdout.trim_end()),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn staged_with(script: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DEFAULT_ENTRY_POINT), script).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_exit_zero_passes() {
        let dir = staged_with("echo all good\nexit 0\n");
        assert_eq!(SelfTest::default().validate(dir.path()).await, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_output() {
        let dir = staged_with("echo 'checking config'\necho 'AssertionError: bad price' >&2\nexit 1\n");
        match SelfTest::default().validate(dir.path()).await {
            Verdict::Fail { reason, diagnostic } => {
                assert!(reason.contains("exited"));
                assert!(diagnostic.contains("AssertionError: bad price"));
                assert!(diagnostic.contains("checking config"));
                // stderr comes first
                assert!(diagnostic.find("AssertionError") < diagnostic.find("checking"));
            }
            Verdict::Pass => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_missing_self_test_fails() {
        let dir = TempDir::new().unwrap();
        match SelfTest::default().validate(dir.path()).await {
            Verdict::Fail { reason, .. } => assert!(reason.contains("no self-test present")),
            Verdict::Pass => panic!("candidate without self-test must not pass"),
        }
    }

    #[tokio::test]
    async fn test_runs_in_staged_directory() {
        let dir = staged_with("test -f marker.txt\n");
        fs::write(dir.path().join("marker.txt"), "").unwrap();
        assert!(SelfTest::default().validate(dir.path()).await.passed());
    }

    #[tokio::test]
    async fn test_timeout_fails() {
        let dir = staged_with("exec sleep 5\n");
        let self_test = SelfTest {
            timeout: Duration::from_millis(200),
            ..SelfTest::default()
        };
        match self_test.validate(dir.path()).await {
            Verdict::Fail { reason, .. } => assert!(reason.contains("timed out")),
            Verdict::Pass => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn test_launch_error_fails() {
        let dir = staged_with("exit 0\n");
        let self_test = SelfTest {
            interpreter: "/nonexistent/interpreter".to_string(),
            ..SelfTest::default()
        };
        match self_test.validate(dir.path()).await {
            Verdict::Fail { reason, diagnostic } => {
                assert!(reason.contains("could not be started"));
                assert!(!diagnostic.is_empty());
            }
            Verdict::Pass => panic!("expected launch failure"),
        }
    }
}
