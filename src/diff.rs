use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

/// Normalized edit similarity in `[0, 1]`: `2 * matched / (len(a) + len(b))`, 1 when equal.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    f64::from(TextDiff::from_chars(a, b).ratio())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffTag {
    Equal,
    Delete,
    Insert,
}

impl From<ChangeTag> for DiffTag {
    fn from(tag: ChangeTag) -> Self {
        match tag {
            ChangeTag::Equal => DiffTag::Equal,
            ChangeTag::Delete => DiffTag::Delete,
            ChangeTag::Insert => DiffTag::Insert,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffSpan {
    pub tag: DiffTag,
    pub text: String,
}

/// Word-level diff from `old` to `new`, with runs of the same tag merged.
pub fn word_diff(old: &str, new: &str) -> Vec<DiffSpan> {
    let diff = TextDiff::from_words(old, new);
    let mut spans: Vec<DiffSpan> = Vec::new();
    for change in diff.iter_all_changes() {
        let tag = DiffTag::from(change.tag());
        match spans.last_mut() {
            Some(last) if last.tag == tag => last.text.push_str(change.value()),
            _ => spans.push(DiffSpan {
                tag,
                text: change.value().to_string(),
            }),
        }
    }
    spans
}

/// Line preview of a rewrite, grouped around changes the way `diff -u` reads.
pub fn render_preview(old: &str, new: &str, context: usize) -> String {
    let diff = TextDiff::configure()
        .algorithm(similar::Algorithm::Myers)
        .diff_lines(old, new);

    let mut out = String::new();
    for (idx, group) in diff.grouped_ops(context).iter().enumerate() {
        if idx > 0 {
            out.push_str("...\n");
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => "- ",
                    ChangeTag::Insert => "+ ",
                    ChangeTag::Equal => "  ",
                };
                let _ = write!(out, "{sign}{change}");
                if change.missing_newline() {
                    out.push('\n');
                }
            }
        }
    }
    out
}

/// A patch that turns `new_text` back into `old_text`.
pub fn undo_patch(path: &Path, old_text: &str, new_text: &str) -> String {
    let patch = diffy::create_patch(new_text, old_text);
    let rendered = patch.to_string();
    let label = path.display().to_string().replace('\\', "/");
    let mut out = format!("--- a/{label}\n+++ b/{label}\n");
    for line in rendered.lines().skip_while(|line| !line.starts_with("@@")) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_matches_indel_similarity() {
        assert_eq!(ratio("foo();", "foo();"), 1.0);
        assert_eq!(ratio("", ""), 1.0);
        assert_eq!(ratio("abc", ""), 0.0);
        // "();" survives: 2 * 3 / 12
        assert!((ratio("foo();", "bar();") - 0.5).abs() < 1e-6);
        assert!(ratio("int count = 0;", "int count = 1;") > 0.9);
    }

    #[test]
    fn word_diff_merges_runs() {
        let spans = word_diff("call(a, b)", "call(a, c)");
        assert_eq!(spans.first().map(|span| span.tag), Some(DiffTag::Equal));
        assert!(spans.iter().any(|span| span.tag == DiffTag::Delete && span.text.contains('b')));
        assert!(spans.iter().any(|span| span.tag == DiffTag::Insert && span.text.contains('c')));
    }

    #[test]
    fn preview_marks_changes() {
        let preview = render_preview("a\nb\nc\n", "a\nB\nc\n", 1);
        assert!(preview.contains("- b\n"));
        assert!(preview.contains("+ B\n"));
    }

    #[test]
    fn undo_patch_reverts_direction() {
        let undo = undo_patch(Path::new("src/x.c"), "old\n", "new\n");
        assert!(undo.starts_with("--- a/src/x.c\n+++ b/src/x.c\n@@"));
        assert!(undo.contains("-new\n"));
        assert!(undo.contains("+old\n"));
    }
}
