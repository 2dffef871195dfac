//! Shared helpers for integration tests.
//!
//! The suites exercise real `jj`/`git` binaries; each test skips (with a
//! message) when the backend is not installed, so the suite passes on
//! machines with only one of them.

#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Stdio};

pub fn jj_available() -> bool {
    binary_available("jj")
}

pub fn git_available() -> bool {
    binary_available("git")
}

fn binary_available(bin: &str) -> bool {
    Command::new(bin)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a command in `dir`, panicking with stderr on failure.
pub fn run(dir: &Path, bin: &str, args: &[&str]) -> String {
    let output = Command::new(bin)
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn {bin}: {e}"));
    assert!(
        output.status.success(),
        "{bin} {args:?} failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Create a jj repository (git-backed store) with test user config.
pub fn init_jj_repo(dir: &Path) {
    run(dir, "jj", &["git", "init"]);
    run(dir, "jj", &["config", "set", "--repo", "user.name", "Wong Test"]);
    run(
        dir,
        "jj",
        &["config", "set", "--repo", "user.email", "wong@example.com"],
    );
}

/// Create a git repository with test user config.
pub fn init_git_repo(dir: &Path) {
    run(dir, "git", &["init", "-b", "main"]);
    run(dir, "git", &["config", "user.name", "Wong Test"]);
    run(dir, "git", &["config", "user.email", "wong@example.com"]);
    run(dir, "git", &["config", "commit.gpgsign", "false"]);
}

/// Skip the calling test when `jj` is missing.
#[macro_export]
macro_rules! require_jj {
    () => {
        if !common::jj_available() {
            eprintln!("skipping: jj not installed");
            return;
        }
    };
}

/// Skip the calling test when `git` is missing.
#[macro_export]
macro_rules! require_git {
    () => {
        if !common::git_available() {
            eprintln!("skipping: git not installed");
            return;
        }
    };
}
