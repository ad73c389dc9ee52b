//! Console surface of the CLI: human narration, or one JSON object per event with `--json`.

use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::diff::DiffTag;
use crate::orchestrate::{FailedMatch, HunkRecord, Resolution};
use crate::patch::{Hunk, LineKind, PatchFile};
use crate::reconcile::{DiffReport, LineDiff, View};

#[derive(Debug, Clone, Copy)]
pub struct Console {
    pub json: bool,
}

impl Console {
    pub fn say(&self, text: impl AsRef<str>) {
        if !self.json {
            println!("{}", text.as_ref());
        }
    }

    pub fn event(&self, kind: &str, fields: JsonMap<String, JsonValue>) {
        if !self.json {
            return;
        }
        let mut event = JsonMap::new();
        event.insert("event".into(), JsonValue::String(kind.to_string()));
        for (key, value) in fields {
            event.insert(key, value);
        }
        println!("{}", JsonValue::Object(event));
    }

    pub fn classification(&self, record: &HunkRecord) {
        let mut fields = JsonMap::new();
        fields.insert("hunk".into(), json!(record.name));
        fields.insert("path".into(), json!(record.path.display().to_string()));
        fields.insert("outcome".into(), json!(record.outcome));
        fields.insert("detail".into(), json!(record.detail));
        self.event("classification", fields);
    }

    pub fn hunk_action(&self, kind: &str, name: &str, path: &Path, dry_run: bool) {
        let mut fields = JsonMap::new();
        fields.insert("hunk".into(), json!(name));
        fields.insert("path".into(), json!(path.display().to_string()));
        fields.insert("dry_run".into(), JsonValue::Bool(dry_run));
        self.event(kind, fields);
    }
}

#[derive(Default)]
pub struct CommandStats {
    pub applied: usize,
    pub skipped: usize,
    pub dry_run: usize,
    pub no_op: usize,
}

impl CommandStats {
    pub fn print(&self, console: &Console, label: &str) {
        if console.json {
            let mut fields = JsonMap::new();
            fields.insert("applied".into(), json!(self.applied));
            fields.insert("skipped".into(), json!(self.skipped));
            fields.insert("dry_run".into(), json!(self.dry_run));
            fields.insert("no_op".into(), json!(self.no_op));
            console.event("summary", fields);
            return;
        }
        println!(
            "{label} summary: applied={}, skipped={}, dry-run={}, no-op={}",
            self.applied, self.skipped, self.dry_run, self.no_op
        );
    }
}

pub fn print_header(console: &Console, patch: &PatchFile, details: &[String]) {
    console.say(format!("patch: {}", patch.source.display()));
    console.say(format!("hunks: {}", patch.hunks.len()));
    for detail in details {
        console.say(detail);
    }
    console.say("---");
}

pub fn print_hunks(console: &Console, hunks: &[Hunk]) {
    for hunk in hunks {
        console.say(format!("--- {} ---", hunk.name()));
        console.say(hunk.to_string().trim_end());
    }
}

pub fn print_resolution(console: &Console, resolution: &Resolution) {
    if resolution.applied_by_git {
        console.say("git apply succeeded; every hunk is in place.");
        return;
    }
    print_failed_matched(console, &resolution.failed_matched);
    print_bucket(console, "already applied", &resolution.already_applied);
    print_bucket(console, "no matching location", &resolution.failed_unmatched);
    print_bucket(console, "file not found", &resolution.file_not_found);
}

fn print_failed_matched(console: &Console, failed: &[FailedMatch]) {
    if failed.is_empty() {
        return;
    }
    console.say(format!("located but not applied ({}):", failed.len()));
    for entry in failed {
        console.say(format!(
            "  - {} near line {} ({:.0}% applied)",
            entry.name, entry.line, entry.applied_percentage
        ));
        for message in &entry.messages {
            console.say(format!("      {message}"));
        }
    }
}

fn print_bucket(console: &Console, title: &str, names: &[String]) {
    if names.is_empty() {
        return;
    }
    console.say(format!("{title} ({}):", names.len()));
    for name in names {
        console.say(format!("  - {name}"));
    }
}

/// Human rendering of one reconciliation, as `inspect` shows it.
pub fn print_report(console: &Console, hunk: &Hunk, report: &DiffReport) {
    if console.json {
        let mut fields = JsonMap::new();
        fields.insert("hunk".into(), json!(hunk.name()));
        fields.insert("report".into(), json!(report));
        console.event("report", fields);
        return;
    }
    println!("=== {} ===", hunk.name());
    let Some(line) = report.match_start_line else {
        println!("no match");
        return;
    };
    let view = match report.view {
        Some(View::After) => "post-image",
        _ => "pre-image",
    };
    println!("matched at line {line} via the {view} ({:?})", report.language);
    if report.is_clean() {
        println!("already applied");
        return;
    }
    for (title, kind) in [
        ("removed lines still present", LineKind::Removed),
        ("added lines", LineKind::Added),
        ("context drift", LineKind::Context),
    ] {
        print_diffs(title, report.diffs(kind));
    }
    if !report.additional_lines.is_empty() {
        println!("unexplained lines:");
        for extra in &report.additional_lines {
            println!("  ? {extra}");
        }
    }
}

fn print_diffs(title: &str, diffs: &[LineDiff]) {
    if diffs.is_empty() {
        return;
    }
    println!("{title}:");
    for diff in diffs {
        let at = diff
            .file_line_number
            .map(|line| format!("{line:>5}"))
            .unwrap_or_else(|| "    -".to_string());
        if diff.is_missing {
            println!("  {at} missing: {}", diff.patch_line);
        } else if diff.ratio >= 1.0 {
            println!("  {at} {}", diff.patch_line);
        } else {
            println!("  {at} {} ({:.2})", render_spans(diff), diff.ratio);
        }
    }
}

fn render_spans(diff: &LineDiff) -> String {
    diff.plaintext_diff
        .iter()
        .map(|span| match span.tag {
            DiffTag::Equal => span.text.clone(),
            DiffTag::Delete => format!("[-{}-]", span.text),
            DiffTag::Insert => format!("{{+{}+}}", span.text),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Apply,
    Skip,
    ApplyAll,
    Quit,
}

pub fn prompt_approval(name: &str) -> Result<ApprovalDecision> {
    loop {
        print_prompt(&format!("Apply {name}? [y]es/[n]o/[a]ll/[q]uit: "))?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" | "" => return Ok(ApprovalDecision::Apply),
            "n" | "no" => return Ok(ApprovalDecision::Skip),
            "a" | "all" => return Ok(ApprovalDecision::ApplyAll),
            "q" | "quit" => return Ok(ApprovalDecision::Quit),
            _ => {
                println!("Please enter y, n, a, or q.");
            }
        }
    }
}

/// Yes/no question on stdin; anything but an explicit yes is a no.
pub fn confirm(question: &str) -> Result<bool> {
    print_prompt(question)?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(is_yes(&input))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_prompt(message: &str) -> Result<()> {
    print!("{message}");
    io::stdout().flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::word_diff;

    #[test]
    fn only_an_explicit_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES \r\n"));
        assert!(!is_yes("\n"));
        assert!(!is_yes("n\n"));
        assert!(!is_yes("yep\n"));
        assert!(!is_yes(""));
    }

    #[test]
    fn spans_mark_deletions_and_insertions() {
        let diff = LineDiff {
            patch_index: 0,
            kind: LineKind::Context,
            patch_line: "call(a, b)".into(),
            file_line: "call(a, c)".into(),
            is_missing: false,
            plaintext_diff: word_diff("call(a, b)", "call(a, c)"),
            language_diff: None,
            ratio: 0.9,
            file_line_number: Some(4),
        };
        let rendered = render_spans(&diff);
        assert!(rendered.starts_with("call(a, "));
        assert!(rendered.contains("[-b"));
        assert!(rendered.contains("{+c"));
    }
}
