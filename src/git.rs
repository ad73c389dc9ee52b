use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

/// Outcome of handing the whole patch to `git apply`.
#[derive(Debug, Clone)]
pub struct ApplyAttempt {
    pub success: bool,
    pub stderr: String,
}

impl Default for ApplyAttempt {
    fn default() -> Self {
        Self {
            success: false,
            stderr: "patch has not been run yet".to_string(),
        }
    }
}

impl ApplyAttempt {
    /// Stand-in used when the git step is disabled: nothing applied, nobody named.
    pub fn skipped() -> Self {
        Self {
            success: false,
            stderr: String::new(),
        }
    }
}

/// Hands the whole patch to `git apply` in `root`. With `check` nothing is written.
pub fn run_git_apply(patch: &Path, root: &Path, reverse: bool, check: bool) -> Result<ApplyAttempt> {
    let patch = patch
        .canonicalize()
        .with_context(|| format!("resolving patch {}", patch.display()))?;
    let mut command = Command::new("git");
    command.arg("apply");
    if reverse {
        command.arg("--reverse");
    }
    if check {
        command.arg("--check");
    }
    let output = command
        .arg(&patch)
        .current_dir(root)
        .output()
        .with_context(|| format!("running git apply in {}", root.display()))?;
    Ok(ApplyAttempt {
        success: output.status.success(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Paths named by `git apply` diagnostics, grouped by failure kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyFailures {
    pub does_not_apply: BTreeSet<String>,
    pub already_exists: BTreeSet<String>,
    pub file_not_found: BTreeSet<String>,
}

impl ApplyFailures {
    pub fn parse(stderr: &str) -> Self {
        let mut failures = Self::default();
        for line in stderr.lines() {
            // `error: <path>: <reason>`
            let Some(path) = line.split(':').nth(1).map(str::trim) else {
                continue;
            };
            if path.is_empty() {
                continue;
            }
            if line.contains("patch does not apply") {
                failures.does_not_apply.insert(path.to_string());
            } else if line.contains("already exists") {
                failures.already_exists.insert(path.to_string());
            } else if line.contains("No such file") {
                failures.file_not_found.insert(path.to_string());
            }
        }
        failures
    }

    /// What git reported about `path`, if it named it. Only a missing file changes how a
    /// hunk is routed; the other reasons label the record.
    pub fn reason(&self, path: &str) -> Option<&'static str> {
        if self.file_not_found.contains(path) {
            Some("file not found")
        } else if self.already_exists.contains(path) {
            Some("already exists")
        } else if self.does_not_apply.contains(path) {
            Some("patch does not apply")
        } else {
            None
        }
    }
}
