//! Aligns a hunk against the file region it most likely belongs to and reports every
//! line-level difference.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::diff::{DiffSpan, ratio, word_diff};
use crate::lexer::{Language, LanguageDiff, Tokenize, language_diff, tokenizer_for};
use crate::locate::Locator;
use crate::patch::{Hunk, LineKind};
use crate::settings::Settings;
use crate::text::TargetText;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    NoMatch,
    MatchFound,
}

/// Which rendition of the hunk the locator anchored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// Context and Added lines: the file as it looks with the hunk applied.
    After,
    /// Context and Removed lines: the file as it looked before.
    Before,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineDiff {
    /// Index of the line within `Hunk::lines`.
    pub patch_index: usize,
    pub kind: LineKind,
    pub patch_line: String,
    /// Best file candidate as found on disk, indentation included; empty when none.
    pub file_line: String,
    pub is_missing: bool,
    pub plaintext_diff: Vec<DiffSpan>,
    pub language_diff: Option<LanguageDiff>,
    pub ratio: f64,
    pub file_line_number: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffReport {
    pub status: MatchStatus,
    pub match_start_line: Option<usize>,
    pub view: Option<View>,
    pub language: Language,
    pub removed_diffs: Vec<LineDiff>,
    pub added_diffs: Vec<LineDiff>,
    pub context_diffs: Vec<LineDiff>,
    pub additional_lines: Vec<String>,
    /// Non-blank Removed lines in the hunk, confirmed or not.
    pub removed_expected: usize,
    pub label: String,
}

impl DiffReport {
    fn no_match(hunk: &Hunk, language: Language) -> Self {
        Self {
            status: MatchStatus::NoMatch,
            match_start_line: None,
            view: None,
            language,
            removed_diffs: Vec::new(),
            added_diffs: Vec::new(),
            context_diffs: Vec::new(),
            additional_lines: Vec::new(),
            removed_expected: hunk
                .lines
                .iter()
                .filter(|line| line.kind == LineKind::Removed && !line.text.trim().is_empty())
                .count(),
            label: hunk.label.clone(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.status == MatchStatus::MatchFound
    }

    /// Nothing left to explain: the hunk's intended result is already in the file.
    pub fn is_clean(&self) -> bool {
        self.removed_diffs.is_empty()
            && self.added_diffs.is_empty()
            && self.context_diffs.is_empty()
            && self.additional_lines.is_empty()
    }

    pub fn diffs(&self, kind: LineKind) -> &[LineDiff] {
        match kind {
            LineKind::Added => &self.added_diffs,
            LineKind::Removed => &self.removed_diffs,
            LineKind::Context => &self.context_diffs,
        }
    }

    fn diffs_mut(&mut self, kind: LineKind) -> &mut Vec<LineDiff> {
        match kind {
            LineKind::Added => &mut self.added_diffs,
            LineKind::Removed => &mut self.removed_diffs,
            LineKind::Context => &mut self.context_diffs,
        }
    }

    /// The diff recorded for a given hunk line, if any.
    pub fn diff_for(&self, patch_index: usize) -> Option<&LineDiff> {
        self.removed_diffs
            .iter()
            .chain(&self.added_diffs)
            .chain(&self.context_diffs)
            .find(|diff| diff.patch_index == patch_index)
    }
}

/// Locates `hunk` in `file` and classifies each of its lines against the located window.
pub fn reconcile(hunk: &Hunk, file: &TargetText, settings: &Settings) -> DiffReport {
    let tokenizer = tokenizer_for(&hunk.path);
    let locator = Locator::new(&file.lines, &settings.locator);
    let after: Vec<&str> = hunk.after_lines().map(|line| line.text.as_str()).collect();
    let before: Vec<&str> = hunk.before_lines().map(|line| line.text.as_str()).collect();

    let located = locator
        .locate(&after, hunk.range.new_start)
        .map(|line| (line, View::After, after.len()))
        .or_else(|| {
            locator
                .locate(&before, hunk.range.old_start)
                .map(|line| (line, View::Before, before.len()))
        });
    let Some((start_line, view, view_len)) = located else {
        return DiffReport::no_match(hunk, tokenizer.language());
    };

    // The post-image never contains the Removed lines above its first line.
    let lead = match view {
        View::After => hunk
            .lines
            .iter()
            .take_while(|line| line.kind == LineKind::Removed)
            .count(),
        View::Before => 0,
    };
    let anchor = start_line - 1;
    let end = (anchor + view_len + settings.window_buffer).min(file.lines.len());
    let first = anchor.saturating_sub(lead).min(end);
    let window = &file.lines[first..end];
    let aligner = Aligner {
        hunk,
        window,
        window_start: first + 1,
        start_line,
        ratio_floor: settings.similarity_ratio,
        tokenizer,
    };
    let mut report = aligner.align();
    report.view = Some(view);
    report
}

struct Aligner<'a> {
    hunk: &'a Hunk,
    window: &'a [String],
    /// File line number of `window[0]`.
    window_start: usize,
    start_line: usize,
    ratio_floor: f64,
    tokenizer: &'static dyn Tokenize,
}

impl Aligner<'_> {
    fn align(&self) -> DiffReport {
        let mut report = DiffReport::no_match(self.hunk, self.tokenizer.language());
        report.status = MatchStatus::MatchFound;
        report.match_start_line = Some(self.start_line);

        let added: HashSet<&str> = self
            .hunk
            .lines
            .iter()
            .filter(|line| line.kind == LineKind::Added)
            .map(|line| line.text.trim())
            .collect();
        let mut matched: HashSet<&str> = HashSet::new();
        let mut claimed: BTreeSet<usize> = BTreeSet::new();

        for (idx, line) in self.hunk.lines.iter().enumerate() {
            let patch_text = line.text.trim();
            if patch_text.is_empty() {
                continue;
            }
            let (best_ratio, best_idx) = self.best_candidate(idx, patch_text);
            let file_line = best_idx.map(|i| self.window[i].as_str()).unwrap_or("");
            let file_text = file_line.trim();

            if best_ratio == 1.0 && line.kind != LineKind::Removed {
                matched.insert(file_text);
                claimed.extend(best_idx);
                continue;
            }
            if best_ratio > self.ratio_floor {
                if let Some(file_idx) = best_idx {
                    if line.kind == LineKind::Removed
                        && added.contains(file_text)
                        && self.is_already_moved(idx, file_idx)
                    {
                        continue;
                    }
                }
                matched.insert(file_text);
                claimed.extend(best_idx);
                report.diffs_mut(line.kind).push(LineDiff {
                    patch_index: idx,
                    kind: line.kind,
                    patch_line: patch_text.to_string(),
                    file_line: file_line.to_string(),
                    is_missing: false,
                    plaintext_diff: word_diff(patch_text, file_text),
                    language_diff: language_diff(self.tokenizer, patch_text, file_text),
                    ratio: best_ratio,
                    file_line_number: best_idx.map(|i| self.window_start + i),
                });
            } else if line.kind != LineKind::Removed {
                report.diffs_mut(line.kind).push(LineDiff {
                    patch_index: idx,
                    kind: line.kind,
                    patch_line: patch_text.to_string(),
                    file_line: file_line.to_string(),
                    is_missing: true,
                    plaintext_diff: Vec::new(),
                    language_diff: None,
                    ratio: best_ratio,
                    file_line_number: best_idx.map(|i| self.window_start + i),
                });
            }
        }

        report.additional_lines = self.additional_lines(&matched, &claimed);
        report
    }

    /// Window line with the highest similarity to `patch_text`. A later line that only ties
    /// must also agree with the hunk's neighbors to take over.
    fn best_candidate(&self, idx: usize, patch_text: &str) -> (f64, Option<usize>) {
        let mut best = (0.0, None);
        for (file_idx, file_line) in self.window.iter().enumerate() {
            let current = ratio(file_line.trim(), patch_text);
            if current < best.0 {
                continue;
            }
            if current == best.0 && !self.compare_nearby(idx, file_idx) {
                continue;
            }
            best = (current, Some(file_idx));
        }
        best
    }

    /// Do the nearest non-Removed hunk lines on either side resemble the file lines around
    /// `file_idx`?
    fn compare_nearby(&self, idx: usize, file_idx: usize) -> bool {
        let lines = &self.hunk.lines;
        let previous = lines[..idx]
            .iter()
            .rev()
            .find(|line| line.kind != LineKind::Removed)
            .map(|line| line.text.trim());
        let next = lines[idx + 1..]
            .iter()
            .find(|line| line.kind != LineKind::Removed)
            .map(|line| line.text.trim());

        let resembles = |patch: Option<&str>, file: Option<&String>| match (patch, file) {
            (Some(patch), Some(file)) if !patch.is_empty() => {
                ratio(patch, file.trim()) > self.ratio_floor
            }
            _ => true,
        };
        let above = file_idx
            .checked_sub(1)
            .and_then(|i| self.window.get(i));
        resembles(previous, above) && resembles(next, self.window.get(file_idx + 1))
    }

    /// A Removed line whose file match is really one of the hunk's Added lines sitting in
    /// its new position: the surrounding pre-image lines do not line up around it.
    fn is_already_moved(&self, idx: usize, file_idx: usize) -> bool {
        let lines = &self.hunk.lines;
        let before: Vec<&str> = lines[..idx]
            .iter()
            .rev()
            .filter(|line| line.kind != LineKind::Added)
            .take(2)
            .map(|line| line.text.trim())
            .collect();
        let after: Vec<&str> = lines[idx + 1..]
            .iter()
            .filter(|line| line.kind != LineKind::Added)
            .take(2)
            .map(|line| line.text.trim())
            .collect();

        if self.window[file_idx].trim() != lines[idx].text.trim() {
            return true;
        }
        let above_mismatch = before.iter().enumerate().any(|(distance, expected)| {
            file_idx
                .checked_sub(distance + 1)
                .and_then(|i| self.window.get(i))
                .is_some_and(|file| file.trim() != *expected)
        });
        let below_mismatch = after.iter().enumerate().any(|(distance, expected)| {
            self.window
                .get(file_idx + distance + 1)
                .is_some_and(|file| file.trim() != *expected)
        });
        above_mismatch || below_mismatch
    }

    /// Non-blank window lines nobody claimed, lying strictly between the first and last
    /// claimed ones. A line repeating a matched text counts as claimed.
    fn additional_lines(&self, matched: &HashSet<&str>, claimed: &BTreeSet<usize>) -> Vec<String> {
        let (Some(&first), Some(&last)) = (claimed.first(), claimed.last()) else {
            return Vec::new();
        };
        self.window[first + 1..last.max(first + 1)]
            .iter()
            .enumerate()
            .filter(|(offset, _)| !claimed.contains(&(first + 1 + offset)))
            .map(|(_, line)| line.trim())
            .filter(|text| !text.is_empty() && !matched.contains(text))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::TokenKind;
    use crate::patch::HunkRange;

    fn hunk(path: &str, old_start: usize, new_start: usize, body: &[&str]) -> Hunk {
        let mut hunk = Hunk::new(
            path,
            HunkRange {
                old_start,
                old_count: body.iter().filter(|l| !l.starts_with('+')).count(),
                new_start,
                new_count: body.iter().filter(|l| !l.starts_with('-')).count(),
            },
            "",
        );
        for line in body {
            let (marker, text) = line.split_at(1);
            let kind = match marker {
                "+" => LineKind::Added,
                "-" => LineKind::Removed,
                _ => LineKind::Context,
            };
            hunk.push(kind, text);
        }
        hunk
    }

    fn padded(total: usize, at: usize, block: &[&str]) -> TargetText {
        let mut lines: Vec<String> = (1..=total).map(|n| format!("/* pad {n:02} */")).collect();
        for (offset, text) in block.iter().enumerate() {
            lines[at - 1 + offset] = text.to_string();
        }
        TargetText::from_text(&(lines.join("\n") + "\n"))
    }

    #[test]
    fn applied_hunk_reports_clean() {
        let hunk = hunk("a.c", 3, 3, &[" int a;", "-foo();", "+bar();", " return 0;"]);
        let file = padded(12, 3, &["int a;", "bar();", "return 0;"]);
        let report = reconcile(&hunk, &file, &Settings::default());
        assert!(report.is_match());
        assert_eq!(report.match_start_line, Some(3));
        assert_eq!(report.view, Some(View::After));
        assert!(report.is_clean(), "{report:#?}");
    }

    #[test]
    fn shifted_hunk_records_removed_and_missing_added() {
        let hunk = hunk("a.c", 10, 10, &[" int a;", "-foo();", "+bar();", " return 0;"]);
        let file = padded(20, 12, &["int a;", "foo();", "return 0;"]);
        let report = reconcile(&hunk, &file, &Settings::default());

        assert_eq!(report.match_start_line, Some(12));
        assert!(report.context_diffs.is_empty());
        assert!(report.additional_lines.is_empty());
        assert_eq!(report.removed_diffs.len(), 1);
        assert_eq!(report.removed_diffs[0].file_line_number, Some(13));
        assert!(!report.removed_diffs[0].is_missing);
        assert_eq!(report.added_diffs.len(), 1);
        assert!(report.added_diffs[0].is_missing);
        assert_eq!(report.added_diffs[0].patch_line, "bar();");
    }

    #[test]
    fn moved_line_is_not_a_removed_match() {
        let body = [
            " a_ctx();",
            "-moved();",
            " b_ctx();",
            " c_ctx();",
            "+moved();",
            " d_ctx();",
        ];
        let moved = hunk("m.c", 1, 1, &body);
        let applied = TargetText::from_text("a_ctx();\nb_ctx();\nc_ctx();\nmoved();\nd_ctx();\n");
        let report = reconcile(&moved, &applied, &Settings::default());
        assert!(report.removed_diffs.is_empty());
        assert!(report.is_clean(), "{report:#?}");

        let pending = TargetText::from_text("a_ctx();\nmoved();\nb_ctx();\nc_ctx();\nd_ctx();\n");
        let report = reconcile(&moved, &pending, &Settings::default());
        assert_eq!(report.removed_diffs.len(), 1);
        assert_eq!(report.removed_diffs[0].file_line_number, Some(2));
    }

    #[test]
    fn interleaved_lines_are_additional() {
        let hunk = hunk("x.c", 1, 1, &[" first_call();", " second_call();", "+inserted();", " third_call();"]);
        let file = TargetText::from_text(
            "first_call();\nsecond_call();\nunexpected_logging(level);\nthird_call();\n",
        );
        let report = reconcile(&hunk, &file, &Settings::default());
        assert!(report.is_match());
        assert_eq!(report.additional_lines, vec!["unexpected_logging(level);"]);
        assert_eq!(report.added_diffs.len(), 1);
        assert!(report.added_diffs[0].is_missing);
    }

    #[test]
    fn repeated_context_does_not_hide_interleaved_lines() {
        let hunk = hunk(
            "r.c",
            1,
            1,
            &[
                " first_value = 1;",
                " }",
                " second_value = 2;",
                " }",
                "+z();",
                " third_value = 3;",
            ],
        );
        let file = TargetText::from_text(
            "first_value = 1;\n}\nsecond_value = 2;\n}\nINTERLOPER(evil);\nthird_value = 3;\n",
        );
        let report = reconcile(&hunk, &file, &Settings::default());
        assert!(report.is_match());
        assert_eq!(report.additional_lines, vec!["INTERLOPER(evil);"]);
    }

    #[test]
    fn leading_removed_lines_stay_in_the_window() {
        let hunk = hunk(
            "clamp.c",
            10,
            10,
            &[
                "-if (len > max) {",
                "-    len = max;",
                "-    warn_truncated(len);",
                "-}",
                "+len = clamp(len, max);",
                " copy_bytes(dst, src, len);",
                " flush(dst);",
                " return len;",
            ],
        );
        let file = padded(
            24,
            10,
            &[
                "if (len > max) {",
                "    len = max;",
                "    warn_truncated(len);",
                "}",
                "copy_bytes(dst, src, len);",
                "flush(dst);",
                "return len;",
            ],
        );
        let report = reconcile(&hunk, &file, &Settings::default());
        assert!(report.is_match());
        assert_eq!(report.removed_expected, 4);
        assert_eq!(report.removed_diffs.len(), 4, "{report:#?}");
        let numbers: Vec<_> = report
            .removed_diffs
            .iter()
            .map(|diff| diff.file_line_number)
            .collect();
        assert_eq!(numbers, vec![Some(10), Some(11), Some(12), Some(13)]);
        assert!(report.additional_lines.is_empty());
    }

    #[test]
    fn unrelated_file_is_no_match() {
        let hunk = hunk("a.c", 2, 2, &[" alpha();", "-beta();", "+gamma();", " delta();"]);
        let file = TargetText::from_text(&"zzzzzzzzzzzz\n".repeat(30));
        let report = reconcile(&hunk, &file, &Settings::default());
        assert_eq!(report.status, MatchStatus::NoMatch);
        assert_eq!(report.match_start_line, None);
    }

    #[test]
    fn drifted_context_carries_token_diff() {
        let hunk = hunk(
            "count.c",
            1,
            1,
            &[" int count = 0;", " reset(count);", "+log_reset();", " return count;"],
        );
        let file = TargetText::from_text("int count = 1;\nreset(count);\nreturn count;\n");
        let report = reconcile(&hunk, &file, &Settings::default());
        assert_eq!(report.language, Language::C);
        assert_eq!(report.context_diffs.len(), 1);
        let drift = &report.context_diffs[0];
        assert_eq!(drift.patch_index, 0);
        assert_eq!(drift.file_line, "int count = 1;");
        let tokens = &drift.language_diff.as_ref().expect("c tokens").diff_tokens;
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(report.diff_for(0), Some(drift));
    }
}
