//! Restart into freshly committed code.
//!
//! The process image is replaced in place with the same arguments, so the
//! pid survives and a supervisor sees no exit.

use crate::ota::CommitSuccess;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// Suffix Linux appends to `/proc/self/exe` once the binary was replaced
const DELETED_SUFFIX: &str = " (deleted)";

/// Path to restart from. A binary swapped by rename shows up as
/// `<path> (deleted)`; the new file lives at `<path>`.
pub fn restart_target(exe: &Path) -> PathBuf {
    match exe.to_str().and_then(|s| s.strip_suffix(DELETED_SUFFIX)) {
        Some(stripped) => PathBuf::from(stripped),
        None => exe.to_path_buf(),
    }
}

fn restart_command() -> io::Result<Command> {
    let exe = restart_target(&std::env::current_exe()?);
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    let mut cmd = Command::new(exe);
    cmd.args(args);
    Ok(cmd)
}

/// Replace the running process with the committed version.
///
/// Only returns if the exec failed.
#[cfg(unix)]
pub fn reexec(commit: &CommitSuccess) -> io::Error {
    use std::os::unix::process::CommandExt;

    info!("♻️  Restarting into {} (was {})", commit.to, commit.from);
    match restart_command() {
        Ok(mut cmd) => cmd.exec(),
        Err(e) => e,
    }
}

/// Spawn the committed version and exit.
#[cfg(not(unix))]
pub fn reexec(commit: &CommitSuccess) -> io::Error {
    info!("♻️  Restarting into {} (was {})", commit.to, commit.from);
    match restart_command().and_then(|mut cmd| cmd.spawn()) {
        Ok(_) => std::process::exit(0),
        Err(e) => e,
    }
}
