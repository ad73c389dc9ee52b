use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::patch::{Hunk, LineKind};
use crate::text::{EncodingStrategy, TargetText, WriteOptions, WriteReceipt, write_lines};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    /// The hunk's pre-image does not occur verbatim anywhere in the file.
    AnchorNotFound,
    /// The walk diverged from the file after the anchor was found.
    Mismatch,
    /// The post-image is already in place; applying again would duplicate it.
    AlreadyPresent,
}

impl ApplyOutcome {
    pub fn is_applied(self) -> bool {
        self == ApplyOutcome::Applied
    }
}

pub fn can_apply(hunk: &Hunk, lines: &[String]) -> bool {
    plan(hunk, lines).is_ok()
}

/// Applies `hunk` to an in-memory copy of `lines`; `lines` changes only on success.
pub fn apply_to_lines(hunk: &Hunk, lines: &mut Vec<String>) -> ApplyOutcome {
    let anchor = match plan(hunk, lines) {
        Ok(anchor) => anchor,
        Err(outcome) => return outcome,
    };
    let mut working = lines.clone();
    let mut cursor = anchor;
    for line in &hunk.lines {
        match line.kind {
            LineKind::Context => {
                if working.get(cursor) != Some(&line.text) {
                    return ApplyOutcome::Mismatch;
                }
                cursor += 1;
            }
            LineKind::Removed => {
                if working.get(cursor) != Some(&line.text) {
                    return ApplyOutcome::Mismatch;
                }
                working.remove(cursor);
            }
            LineKind::Added => {
                working.insert(cursor, line.text.clone());
                cursor += 1;
            }
        }
    }
    *lines = working;
    ApplyOutcome::Applied
}

/// Reads `path`, applies `hunk` and writes the result back. Nothing is written unless the
/// outcome is `Applied`.
pub fn apply(
    hunk: &Hunk,
    path: &Path,
    strategy: &EncodingStrategy,
    options: &WriteOptions,
) -> Result<(ApplyOutcome, Option<WriteReceipt>)> {
    let previous = TargetText::read(path, strategy)?;
    let mut lines = previous.lines.clone();
    let outcome = apply_to_lines(hunk, &mut lines);
    if !outcome.is_applied() {
        return Ok((outcome, None));
    }
    let receipt = write_lines(path, &previous, &lines, options)?;
    Ok((outcome, Some(receipt)))
}

/// Index of the line where the hunk's pre-image starts, or why there is none.
fn plan(hunk: &Hunk, lines: &[String]) -> Result<usize, ApplyOutcome> {
    let before: Vec<&str> = hunk.before_lines().map(|line| line.text.as_str()).collect();
    let after: Vec<&str> = hunk.after_lines().map(|line| line.text.as_str()).collect();
    let found_after = || find_block(lines, &after, hunk.range.new_start.saturating_sub(1));

    if before.is_empty() {
        // Nothing in the file confirms where a pure addition goes, except an empty file.
        if !after.is_empty() && found_after().is_some() {
            return Err(ApplyOutcome::AlreadyPresent);
        }
        let blank = lines.iter().all(|line| line.trim().is_empty());
        return if blank && hunk.range.old_start == 0 && !after.is_empty() {
            Ok(insertion_point(hunk).min(lines.len()))
        } else {
            Err(ApplyOutcome::AnchorNotFound)
        };
    }

    match find_block(lines, &before, insertion_point(hunk)) {
        Some(anchor) => {
            if hunk.count(LineKind::Added) > 0 && block_at(lines, &after, anchor) {
                Err(ApplyOutcome::AlreadyPresent)
            } else {
                Ok(anchor)
            }
        }
        None if before != after && found_after().is_some() => Err(ApplyOutcome::AlreadyPresent),
        None => Err(ApplyOutcome::AnchorNotFound),
    }
}

/// Zero-based index the header points at. A zero-count pre-image inserts after
/// `old_start`, so that line number is already the index.
fn insertion_point(hunk: &Hunk) -> usize {
    if hunk.range.old_count == 0 {
        hunk.range.old_start
    } else {
        hunk.range.old_start.saturating_sub(1)
    }
}

fn block_at(lines: &[String], block: &[&str], start: usize) -> bool {
    lines
        .get(start..start + block.len())
        .is_some_and(|slice| slice.iter().zip(block).all(|(line, expected)| line == expected))
}

/// Start of the occurrence of `block` nearest to `preferred`; later wins a tie.
fn find_block(lines: &[String], block: &[&str], preferred: usize) -> Option<usize> {
    if block.is_empty() || block.len() > lines.len() {
        return None;
    }
    (0..=lines.len() - block.len())
        .filter(|&start| block_at(lines, block, start))
        .min_by_key(|&start| (start.abs_diff(preferred), start < preferred))
}
