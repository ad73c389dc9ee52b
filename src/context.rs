//! Decides whether the drift found around a hunk is safe to paper over with a rewrite.

use std::collections::HashSet;

use serde::Serialize;

use crate::lexer::Token;
use crate::reconcile::{DiffReport, LineDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Run,
    DontRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextDecision {
    pub verdict: Verdict,
    pub messages: Vec<String>,
}

impl ContextDecision {
    pub fn permits(&self) -> bool {
        self.verdict == Verdict::Run
    }
}

pub trait ClassifyContext {
    fn classify(&self, report: &DiffReport) -> ContextDecision;
}

/// Conservative default: only comment, whitespace and punctuation drift in context lines
/// is waved through.
#[derive(Debug, Clone)]
pub struct DriftPolicy {
    pub max_missing_context: usize,
}

impl Default for DriftPolicy {
    fn default() -> Self {
        Self {
            max_missing_context: 2,
        }
    }
}

impl ClassifyContext for DriftPolicy {
    fn classify(&self, report: &DiffReport) -> ContextDecision {
        let mut refusals = Vec::new();
        let mut notes = Vec::new();

        if !report.is_match() {
            refusals.push("no matching location in the file".to_string());
        }

        for diff in report.added_diffs.iter().filter(|diff| !diff.is_missing) {
            refusals.push(format!(
                "added line `{}` is already partly present{} as `{}`",
                diff.patch_line,
                at_line(diff),
                diff.file_line.trim()
            ));
        }

        let confirmed = report.removed_diffs.len();
        let pending = report.added_diffs.iter().any(|diff| diff.is_missing);
        if pending && confirmed > 0 && confirmed < report.removed_expected {
            refusals.push(format!(
                "only {confirmed} of {} removed lines are still present",
                report.removed_expected
            ));
        }

        let missing_context = report
            .context_diffs
            .iter()
            .filter(|diff| diff.is_missing)
            .count();
        if missing_context > self.max_missing_context {
            refusals.push(format!(
                "{missing_context} context lines are missing (at most {} tolerated)",
                self.max_missing_context
            ));
        } else if missing_context > 0 {
            notes.push(format!(
                "{missing_context} context line(s) missing, will be dropped"
            ));
        }

        for diff in report.context_diffs.iter().filter(|diff| !diff.is_missing) {
            match context_drift(diff) {
                Drift::Cosmetic(what) => notes.push(format!(
                    "context{} differs only in {what}",
                    at_line(diff)
                )),
                Drift::Semantic(detail) => refusals.push(format!(
                    "context `{}`{} changed: {detail}",
                    diff.patch_line,
                    at_line(diff)
                )),
            }
        }

        if refusals.is_empty() {
            if notes.is_empty() {
                notes.push("context unchanged".to_string());
            }
            ContextDecision {
                verdict: Verdict::Run,
                messages: notes,
            }
        } else {
            refusals.extend(notes);
            ContextDecision {
                verdict: Verdict::DontRun,
                messages: refusals,
            }
        }
    }
}

enum Drift {
    Cosmetic(&'static str),
    Semantic(String),
}

fn context_drift(diff: &LineDiff) -> Drift {
    let Some(language) = &diff.language_diff else {
        return if squeeze(&diff.patch_line) == squeeze(&diff.file_line) {
            Drift::Cosmetic("whitespace")
        } else {
            Drift::Semantic("text differs in an unsupported language".to_string())
        };
    };

    let patch: HashSet<&Token> = language.patch_tokens.iter().collect();
    let introduced = language
        .file_tokens
        .iter()
        .filter(|token| !patch.contains(token));
    let changed: Vec<&str> = language
        .diff_tokens
        .iter()
        .chain(introduced)
        .filter(|token| token.kind.is_semantic())
        .map(|token| token.text.as_str())
        .collect();
    if changed.is_empty() {
        Drift::Cosmetic("comments, whitespace or punctuation")
    } else {
        Drift::Semantic(format!("tokens {}", changed.join(", ")))
    }
}

fn squeeze(text: &str) -> String {
    text.chars().filter(|ch| !ch.is_whitespace()).collect()
}

fn at_line(diff: &LineDiff) -> String {
    diff.file_line_number
        .map(|line| format!(" at line {line}"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Hunk, HunkRange, LineKind};
    use crate::reconcile::reconcile;
    use crate::settings::Settings;
    use crate::text::TargetText;

    fn report_for(path: &str, body: &[(LineKind, &str)], file: &str) -> DiffReport {
        let mut hunk = Hunk::new(
            path,
            HunkRange {
                old_start: 1,
                old_count: 0,
                new_start: 1,
                new_count: 0,
            },
            "",
        );
        for (kind, text) in body {
            hunk.push(*kind, *text);
        }
        reconcile(&hunk, &TargetText::from_text(file), &Settings::default())
    }

    #[test]
    fn comment_drift_in_c_is_permitted() {
        let report = report_for(
            "a.c",
            &[
                (LineKind::Context, "value = compute(); /* old */"),
                (LineKind::Added, "check(value);"),
                (LineKind::Context, "return value;"),
            ],
            "value = compute(); /* new */\nreturn value;\n",
        );
        assert_eq!(report.context_diffs.len(), 1);
        let decision = DriftPolicy::default().classify(&report);
        assert!(decision.permits(), "{decision:?}");
    }

    #[test]
    fn identifier_drift_is_refused() {
        let report = report_for(
            "a.c",
            &[
                (LineKind::Context, "value = compute(limit);"),
                (LineKind::Added, "check(value);"),
                (LineKind::Context, "return value;"),
            ],
            "value = compute(limits);\nreturn value;\n",
        );
        let decision = DriftPolicy::default().classify(&report);
        assert_eq!(decision.verdict, Verdict::DontRun);
        assert!(decision.messages[0].contains("limit"));
    }

    #[test]
    fn unsupported_language_needs_whitespace_only_drift() {
        let body = [
            (LineKind::Context, "alpha beta gamma delta"),
            (LineKind::Added, "inserted line here"),
            (LineKind::Context, "epsilon zeta"),
        ];
        let spaced = report_for("notes.txt", &body, "alpha  beta gamma delta\nepsilon zeta\n");
        assert!(DriftPolicy::default().classify(&spaced).permits());

        let reworded = report_for("notes.txt", &body, "alpha beta gamma delto\nepsilon zeta\n");
        assert!(!DriftPolicy::default().classify(&reworded).permits());
    }

    #[test]
    fn partially_present_addition_is_refused() {
        let report = report_for(
            "a.c",
            &[
                (LineKind::Context, "start();"),
                (LineKind::Added, "configure(level, 3);"),
                (LineKind::Context, "finish();"),
            ],
            "start();\nconfigure(level, 2);\nfinish();\n",
        );
        assert_eq!(report.added_diffs.len(), 1);
        assert!(!report.added_diffs[0].is_missing);
        assert!(!DriftPolicy::default().classify(&report).permits());
    }

    #[test]
    fn partly_removed_block_is_refused() {
        let report = report_for(
            "a.c",
            &[
                (LineKind::Context, "start();"),
                (LineKind::Removed, "alpha_one();"),
                (LineKind::Removed, "beta_two();"),
                (LineKind::Added, "gamma_three();"),
                (LineKind::Context, "finish();"),
            ],
            "start();\nbeta_two();\nfinish();\n",
        );
        assert_eq!(report.removed_expected, 2);
        assert_eq!(report.removed_diffs.len(), 1);
        let decision = DriftPolicy::default().classify(&report);
        assert_eq!(decision.verdict, Verdict::DontRun);
        assert!(decision.messages[0].contains("only 1 of 2"), "{decision:?}");

        let whole = report_for(
            "a.c",
            &[
                (LineKind::Context, "start();"),
                (LineKind::Removed, "alpha_one();"),
                (LineKind::Removed, "beta_two();"),
                (LineKind::Added, "gamma_three();"),
                (LineKind::Context, "finish();"),
            ],
            "start();\nalpha_one();\nbeta_two();\nfinish();\n",
        );
        assert_eq!(whole.removed_diffs.len(), 2);
        assert!(DriftPolicy::default().classify(&whole).permits());
    }

    #[test]
    fn too_many_missing_context_lines_are_refused() {
        let report = report_for(
            "a.c",
            &[
                (LineKind::Context, "setup_alpha();"),
                (LineKind::Context, "setup_bravo();"),
                (LineKind::Context, "setup_charlie();"),
                (LineKind::Context, "setup_delta();"),
                (LineKind::Context, "g1();"),
                (LineKind::Context, "g2();"),
                (LineKind::Context, "g3();"),
                (LineKind::Added, "new_call();"),
                (LineKind::Context, "teardown();"),
            ],
            "setup_alpha();\nsetup_bravo();\nsetup_charlie();\nsetup_delta();\nteardown();\n",
        );
        let missing = report.context_diffs.iter().filter(|d| d.is_missing).count();
        assert_eq!(missing, 3);
        assert!(!DriftPolicy::default().classify(&report).permits());
        let lenient = DriftPolicy {
            max_missing_context: 3,
        }
        .classify(&report);
        assert!(lenient.permits(), "{lenient:?}");
    }
}
