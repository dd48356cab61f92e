//! Build script for dealwatch-shared.
//!
//! Sets:
//! - DEALWATCH_GIT_SHA: short commit hash of the tree being built
//! - DEALWATCH_BUILD_DATE: UTC build date

use std::process::Command;

fn main() {
    let git_sha = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let build_date = chrono::Utc::now().format("%Y-%m-%d").to_string();

    println!("cargo:rustc-env=DEALWATCH_GIT_SHA={}", git_sha);
    println!("cargo:rustc-env=DEALWATCH_BUILD_DATE={}", build_date);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
}
