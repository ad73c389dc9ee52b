use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use crate::git::ApplyAttempt;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@\s*(?:-(\d+)(?:,(\d+))?)?\s*(?:\+(\d+)(?:,(\d+))?)?\s*@@ ?(.*)$")
        .expect("hunk header pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Added,
    Removed,
    Context,
}

impl LineKind {
    fn marker(self) -> char {
        match self {
            LineKind::Added => '+',
            LineKind::Removed => '-',
            LineKind::Context => ' ',
        }
    }

    fn flipped(self) -> Self {
        match self {
            LineKind::Added => LineKind::Removed,
            LineKind::Removed => LineKind::Added,
            LineKind::Context => LineKind::Context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchLine {
    pub kind: LineKind,
    pub text: String,
}

impl PatchLine {
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// The four integers of a `@@ -old_start,old_count +new_start,new_count @@` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HunkRange {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
}

/// One hunk of a unified diff, bound to the file it targets.
///
/// The enclosing function label that git prints after the closing `@@` is kept in
/// `label` rather than as a pseudo context line, so `lines` only ever holds real
/// source lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub path: PathBuf,
    pub label: String,
    pub range: HunkRange,
    pub lines: Vec<PatchLine>,
}

impl Hunk {
    pub fn new(path: impl Into<PathBuf>, range: HunkRange, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            range,
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, kind: LineKind, text: impl Into<String>) {
        self.lines.push(PatchLine::new(kind, text));
    }

    /// `path:old_start`, the identity used in every report.
    pub fn name(&self) -> String {
        format!("{}:{}", self.path.display(), self.range.old_start)
    }

    pub fn count(&self, kind: LineKind) -> usize {
        self.lines.iter().filter(|line| line.kind == kind).count()
    }

    /// What the file contained before the hunk was applied.
    pub fn before_lines(&self) -> impl Iterator<Item = &PatchLine> {
        self.lines.iter().filter(|line| line.kind != LineKind::Added)
    }

    /// What the file contains once the hunk is applied.
    pub fn after_lines(&self) -> impl Iterator<Item = &PatchLine> {
        self.lines.iter().filter(|line| line.kind != LineKind::Removed)
    }

    /// A new candidate sharing this hunk's identity but carrying different lines.
    pub fn with_lines(&self, lines: Vec<PatchLine>) -> Self {
        Self {
            path: self.path.clone(),
            label: self.label.clone(),
            range: self.range,
            lines,
        }
    }

    pub fn retarget(&self, path: impl Into<PathBuf>) -> Self {
        let mut hunk = self.clone();
        hunk.path = path.into();
        hunk
    }

    pub fn reversed(&self) -> Self {
        Self {
            path: self.path.clone(),
            label: self.label.clone(),
            range: HunkRange {
                old_start: self.range.new_start,
                old_count: self.range.new_count,
                new_start: self.range.old_start,
                new_count: self.range.old_count,
            },
            lines: self
                .lines
                .iter()
                .map(|line| PatchLine::new(line.kind.flipped(), line.text.clone()))
                .collect(),
        }
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{},{} +{},{} @@",
            self.range.old_start, self.range.old_count, self.range.new_start, self.range.new_count
        )?;
        if !self.label.is_empty() {
            write!(f, " {}", self.label)?;
        }
        writeln!(f)?;
        for line in &self.lines {
            writeln!(f, "{}{}", line.kind.marker(), line.text)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct PatchFile {
    pub source: PathBuf,
    pub hunks: Vec<Hunk>,
    pub attempt: ApplyAttempt,
}

impl PatchFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("reading patch {}", path.display()))?;
        Ok(Self {
            source: path.to_path_buf(),
            hunks: parse_hunks(&raw),
            attempt: ApplyAttempt::default(),
        })
    }

    pub fn reversed(&self) -> Self {
        Self {
            source: self.source.clone(),
            hunks: self.hunks.iter().map(Hunk::reversed).collect(),
            attempt: self.attempt.clone(),
        }
    }
}

/// Splits unified-diff text into one `Hunk` per `@@` header.
///
/// Parsing is best effort: malformed headers and stray text are skipped, never fatal.
pub fn parse_hunks(text: &str) -> Vec<Hunk> {
    let mut parser = Parser::default();
    for raw in text.split('\n') {
        let cleaned = raw.replace('\r', "");
        parser.feed(&cleaned);
    }
    parser.finish()
}

#[derive(Default)]
struct Parser {
    hunks: Vec<Hunk>,
    current: Option<Hunk>,
    path: Option<PathBuf>,
    from_git_header: bool,
    old_label: Option<PathBuf>,
    remaining_old: usize,
    remaining_new: usize,
}

impl Parser {
    fn in_body(&self) -> bool {
        self.current.is_some() && (self.remaining_old > 0 || self.remaining_new > 0)
    }

    fn feed(&mut self, line: &str) {
        if self.in_body() && (line.is_empty() || line.starts_with([' ', '+', '-', '\\'])) {
            self.push_content(line);
            return;
        }
        if self.feed_header(line) || line.is_empty() || self.current.is_none() {
            return;
        }
        self.push_content(line);
    }

    fn push_content(&mut self, line: &str) {
        let Some(hunk) = self.current.as_mut() else {
            return;
        };
        let (kind, text) = match line.chars().next() {
            Some('-') => (LineKind::Removed, &line[1..]),
            Some('+') => (LineKind::Added, &line[1..]),
            Some(' ') => (LineKind::Context, &line[1..]),
            Some('\\') => return,
            _ => (LineKind::Context, line),
        };
        match kind {
            LineKind::Removed => self.remaining_old = self.remaining_old.saturating_sub(1),
            LineKind::Added => self.remaining_new = self.remaining_new.saturating_sub(1),
            LineKind::Context => {
                self.remaining_old = self.remaining_old.saturating_sub(1);
                self.remaining_new = self.remaining_new.saturating_sub(1);
            }
        }
        hunk.push(kind, text);
    }

    /// Returns true when the line was a header (or header-like noise) and is consumed.
    fn feed_header(&mut self, line: &str) -> bool {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            self.flush();
            self.path = rest.split_whitespace().next().and_then(label_to_path);
            self.from_git_header = true;
            self.old_label = None;
            return true;
        }
        if let Some(rest) = line.strip_prefix("--- ") {
            self.flush();
            self.old_label = label_to_path(rest);
            return true;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            self.flush();
            if !self.from_git_header {
                self.path = label_to_path(rest).or_else(|| self.old_label.clone());
            }
            return true;
        }
        if let Some(rest) = line.strip_prefix("rename to ") {
            self.flush();
            self.path = label_to_path(rest);
            return true;
        }
        if line.starts_with("@@") {
            self.open_hunk(line);
            return true;
        }
        const NOISE: [&str; 8] = [
            "index ",
            "new file mode",
            "deleted file mode",
            "old mode",
            "new mode",
            "similarity index",
            "dissimilarity index",
            "rename from",
        ];
        NOISE.iter().any(|prefix| line.starts_with(prefix))
    }

    fn open_hunk(&mut self, line: &str) {
        let Some((range, label)) = parse_header(line) else {
            return;
        };
        if self
            .current
            .as_ref()
            .is_some_and(|hunk| !hunk.lines.is_empty())
        {
            self.flush();
        }
        let path = self.path.clone().unwrap_or_default();
        self.remaining_old = range.old_count;
        self.remaining_new = range.new_count;
        self.current = Some(Hunk::new(path, range, label));
    }

    fn flush(&mut self) {
        if let Some(hunk) = self.current.take() {
            if !hunk.lines.is_empty() {
                self.hunks.push(hunk);
            }
        }
        self.remaining_old = 0;
        self.remaining_new = 0;
    }

    fn finish(mut self) -> Vec<Hunk> {
        self.flush();
        self.hunks
    }
}

fn parse_header(line: &str) -> Option<(HunkRange, String)> {
    let caps = HUNK_HEADER.captures(line)?;
    let number = |idx: usize| caps.get(idx).and_then(|m| m.as_str().parse::<usize>().ok());
    let old = number(1).map(|start| (start, number(2).unwrap_or(1)));
    let new = number(3).map(|start| (start, number(4).unwrap_or(1)));
    let ((old_start, old_count), (new_start, new_count)) = match (old, new) {
        (Some(old), Some(new)) => (old, new),
        (Some(old), None) => (old, old),
        (None, Some(new)) => (new, new),
        (None, None) => return None,
    };
    let label = caps
        .get(5)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    Some((
        HunkRange {
            old_start,
            old_count,
            new_start,
            new_count,
        },
        label,
    ))
}

fn label_to_path(label: &str) -> Option<PathBuf> {
    let trimmed = label.split('\t').next().unwrap_or(label).trim();
    if trimmed == "/dev/null" {
        return None;
    }
    let unquoted = trimmed.trim_matches('"');
    let stripped = if let Some(rest) = unquoted.strip_prefix("a/") {
        rest
    } else if let Some(rest) = unquoted.strip_prefix("b/") {
        rest
    } else {
        unquoted
    };
    let cleaned = stripped.trim_start_matches("./");
    if cleaned.is_empty() {
        None
    } else {
        Some(PathBuf::from(cleaned))
    }
}
