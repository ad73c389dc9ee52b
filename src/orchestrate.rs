//! Drives every hunk of a failed patch to exactly one terminal outcome.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::context::ClassifyContext;
use crate::exact::{self, ApplyOutcome};
use crate::git::ApplyFailures;
use crate::patch::{Hunk, HunkRange, LineKind, PatchFile, PatchLine};
use crate::reconcile::{DiffReport, reconcile};
use crate::relocate::Relocate;
use crate::settings::Settings;
use crate::text::{EncodingStrategy, TargetText, WriteOptions, WriteReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Successful,
    AlreadyApplied,
    FailedMatched,
    FailedUnmatched,
    FileNotFound,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Successful => "successful",
            Outcome::AlreadyApplied => "already_applied",
            Outcome::FailedMatched => "failed_matched",
            Outcome::FailedUnmatched => "failed_unmatched",
            Outcome::FileNotFound => "file_not_found",
        }
    }
}

/// A hunk that applies verbatim, either as written or after its context was rewritten.
#[derive(Debug, Clone)]
pub struct SuccessfulCandidate {
    pub name: String,
    pub candidate: Hunk,
    pub rewritten: bool,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedMatch {
    pub name: String,
    pub path: PathBuf,
    pub applied_percentage: f64,
    pub line: usize,
    pub messages: Vec<String>,
}

/// One line per hunk, in patch order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HunkRecord {
    pub name: String,
    pub path: PathBuf,
    pub outcome: Outcome,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub applied_by_git: bool,
    pub records: Vec<HunkRecord>,
    pub successful: Vec<SuccessfulCandidate>,
    pub already_applied: Vec<String>,
    pub failed_matched: Vec<FailedMatch>,
    pub failed_unmatched: Vec<String>,
    pub file_not_found: Vec<String>,
}

impl Resolution {
    /// Nothing left for a human to do once the successful candidates are applied.
    pub fn fully_resolved(&self) -> bool {
        self.applied_by_git
            || (self.failed_matched.is_empty()
                && self.failed_unmatched.is_empty()
                && self.file_not_found.is_empty())
    }
}

enum Resolved {
    Successful(SuccessfulCandidate),
    AlreadyApplied,
    FailedMatched(FailedMatch),
    FailedUnmatched(String),
    FileNotFound(String),
}

pub struct Orchestrator<'a> {
    root: &'a Path,
    settings: &'a Settings,
    strategy: &'a EncodingStrategy,
    relocator: &'a dyn Relocate,
    classifier: &'a dyn ClassifyContext,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        root: &'a Path,
        settings: &'a Settings,
        strategy: &'a EncodingStrategy,
        relocator: &'a dyn Relocate,
        classifier: &'a dyn ClassifyContext,
    ) -> Self {
        Self {
            root,
            settings,
            strategy,
            relocator,
            classifier,
        }
    }

    /// Classifies every hunk of `patch`. Never fails: per-hunk problems become outcomes.
    pub fn resolve(&self, patch: &PatchFile) -> Resolution {
        let mut resolution = Resolution::default();
        if patch.attempt.success {
            resolution.applied_by_git = true;
            return resolution;
        }
        let failures = ApplyFailures::parse(&patch.attempt.stderr);

        for hunk in &patch.hunks {
            let name = hunk.name();
            let (outcome, path, mut detail) = match self.resolve_hunk(hunk, &failures) {
                Resolved::Successful(success) => {
                    let path = success.candidate.path.clone();
                    let detail = if success.rewritten {
                        format!("context rewritten at line {}", success.candidate.range.old_start)
                    } else {
                        "applies as written".to_string()
                    };
                    resolution.successful.push(success);
                    (Outcome::Successful, path, detail)
                }
                Resolved::AlreadyApplied => {
                    resolution.already_applied.push(name.clone());
                    (Outcome::AlreadyApplied, hunk.path.clone(), String::new())
                }
                Resolved::FailedMatched(failed) => {
                    let path = failed.path.clone();
                    let detail = format!(
                        "line {}, {:.0}% applied: {}",
                        failed.line,
                        failed.applied_percentage,
                        failed.messages.join("; ")
                    );
                    resolution.failed_matched.push(failed);
                    (Outcome::FailedMatched, path, detail)
                }
                Resolved::FailedUnmatched(detail) => {
                    resolution.failed_unmatched.push(name.clone());
                    (Outcome::FailedUnmatched, hunk.path.clone(), detail)
                }
                Resolved::FileNotFound(detail) => {
                    resolution.file_not_found.push(name.clone());
                    (Outcome::FileNotFound, hunk.path.clone(), detail)
                }
            };
            if let Some(reason) = failures.reason(&path_key(&hunk.path)) {
                if !detail.is_empty() {
                    detail.push_str("; ");
                }
                detail.push_str("git: ");
                detail.push_str(reason);
            }
            resolution.records.push(HunkRecord {
                name,
                path,
                outcome,
                detail,
            });
        }

        sort_failed(&mut resolution.failed_matched);
        resolution
    }

    fn resolve_hunk(&self, hunk: &Hunk, failures: &ApplyFailures) -> Resolved {
        let key = path_key(&hunk.path);
        let missing =
            failures.file_not_found.contains(&key) || !self.root.join(&hunk.path).is_file();
        let relocated;
        let hunk = if missing {
            match self.relocator.relocate(hunk) {
                Some(path) if self.root.join(&path).is_file() => {
                    relocated = hunk.retarget(path);
                    &relocated
                }
                _ => return Resolved::FileNotFound(format!("{} does not exist", key)),
            }
        } else {
            hunk
        };

        let file = match TargetText::read(&self.root.join(&hunk.path), self.strategy) {
            Ok(file) => file,
            Err(err) => return Resolved::FileNotFound(format!("{err:#}")),
        };
        if exact::can_apply(hunk, &file.lines) {
            return Resolved::Successful(SuccessfulCandidate {
                name: hunk.name(),
                candidate: hunk.clone(),
                rewritten: false,
                messages: Vec::new(),
            });
        }

        let report = reconcile(hunk, &file, self.settings);
        if !report.is_match() {
            return Resolved::FailedUnmatched("no plausible location in the file".to_string());
        }
        if report.is_clean() {
            return Resolved::AlreadyApplied;
        }
        let failed = |messages: Vec<String>| {
            Resolved::FailedMatched(FailedMatch {
                name: hunk.name(),
                path: hunk.path.clone(),
                applied_percentage: applied_percentage(hunk, &report),
                line: report.match_start_line.unwrap_or(0),
                messages,
            })
        };
        if !report.additional_lines.is_empty() {
            return failed(vec![format!(
                "{} unexplained line(s) inside the matched region",
                report.additional_lines.len()
            )]);
        }

        let decision = self.classifier.classify(&report);
        if !decision.permits() {
            return failed(decision.messages);
        }
        let candidate = rewrite(hunk, &report);
        if exact::can_apply(&candidate, &file.lines) {
            Resolved::Successful(SuccessfulCandidate {
                name: hunk.name(),
                candidate,
                rewritten: true,
                messages: decision.messages,
            })
        } else {
            let mut messages = decision.messages;
            messages.push("rewritten hunk still does not apply".to_string());
            failed(messages)
        }
    }

    /// Writes a successful candidate to disk under the orchestrator's root.
    pub fn apply(
        &self,
        success: &SuccessfulCandidate,
        options: &WriteOptions,
    ) -> Result<(ApplyOutcome, Option<WriteReceipt>)> {
        let path = self.root.join(&success.candidate.path);
        exact::apply(&success.candidate, &path, self.strategy, options)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Share of the hunk's changes that reconciliation found nothing left to do for.
pub fn applied_percentage(hunk: &Hunk, report: &DiffReport) -> f64 {
    let total = hunk.count(LineKind::Added) + hunk.count(LineKind::Removed);
    if total == 0 {
        return 100.0;
    }
    let outstanding = report.added_diffs.len() + report.removed_diffs.len();
    100.0 - outstanding as f64 / total as f64 * 100.0
}

/// A fresh hunk carrying the file's own text for drifted context. Missing context is
/// dropped, Added lines stay, and only Removed lines reconciliation found are kept.
pub fn rewrite(hunk: &Hunk, report: &DiffReport) -> Hunk {
    let lines: Vec<PatchLine> = hunk
        .lines
        .iter()
        .enumerate()
        .filter_map(|(idx, line)| match line.kind {
            LineKind::Context => match report.diff_for(idx) {
                Some(diff) if diff.is_missing => None,
                Some(diff) => Some(PatchLine::new(LineKind::Context, diff.file_line.clone())),
                None => Some(line.clone()),
            },
            LineKind::Added => Some(line.clone()),
            LineKind::Removed => report
                .removed_diffs
                .iter()
                .any(|diff| diff.patch_index == idx)
                .then(|| line.clone()),
        })
        .collect();

    // Leading Removed lines can sit above the located line.
    let start = report
        .removed_diffs
        .iter()
        .filter_map(|diff| diff.file_line_number)
        .chain(report.match_start_line)
        .min()
        .unwrap_or(hunk.range.old_start);
    let mut candidate = hunk.with_lines(lines);
    candidate.range = HunkRange {
        old_start: start,
        old_count: candidate.before_lines().count(),
        new_start: start,
        new_count: candidate.after_lines().count(),
    };
    candidate
}

/// Lowest confidence first, then by matched line.
fn sort_failed(failed: &mut [FailedMatch]) {
    failed.sort_by(|a, b| {
        a.applied_percentage
            .total_cmp(&b.applied_percentage)
            .then(a.line.cmp(&b.line))
            .then_with(|| a.name.cmp(&b.name))
    });
}
