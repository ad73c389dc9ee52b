//! Approximate block search: where in a drifted file does a hunk's text most likely start?

use serde::{Deserialize, Serialize};

use crate::diff::ratio;

/// One search pass: a quality tolerance and the positional scale it is weighed against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// Highest acceptable score; 0 demands a perfect match at the anchor.
    pub threshold: f64,
    /// Characters of displacement that cost as much as a fully wrong pattern.
    pub distance: f64,
}

impl MatchConfig {
    /// Farthest start offset from the anchor that can still score under the threshold.
    fn radius(&self) -> usize {
        if self.distance <= 0.0 {
            0
        } else {
            (self.threshold * self.distance).floor() as usize
        }
    }

    fn score(&self, errors: usize, pattern_len: usize, offset: usize, loc: usize) -> f64 {
        let accuracy = errors as f64 / pattern_len as f64;
        let displacement = offset.abs_diff(loc);
        let proximity = if self.distance <= 0.0 {
            if displacement == 0 { 0.0 } else { 1.0 }
        } else {
            displacement as f64 / self.distance
        };
        accuracy + proximity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub times: usize,
    /// Lines between successive probes.
    pub interval: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            times: 2,
            interval: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSettings {
    /// Escalating pass thresholds, strictest first; the last one is the permissive default.
    pub thresholds: Vec<f64>,
    /// Distance used by the permissive pass when no retry policy sizes the search.
    pub base_distance: usize,
    /// Lines the downward probe overlaps the previous window by.
    pub overlap: usize,
    pub retry: Option<RetryPolicy>,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            thresholds: vec![0.01, 0.2, 0.5],
            base_distance: 1000,
            overlap: 5,
            retry: Some(RetryPolicy::default()),
        }
    }
}

impl LocatorSettings {
    /// Pass configurations for a given base distance. Distance grows with the threshold,
    /// so every later pass accepts at least what an earlier one did.
    pub fn passes(&self, base: f64) -> Vec<MatchConfig> {
        let default = self.thresholds.last().copied().unwrap_or(0.0);
        self.thresholds
            .iter()
            .map(|&threshold| MatchConfig {
                threshold,
                distance: if default > 0.0 {
                    base * threshold / default
                } else {
                    base
                },
            })
            .collect()
    }
}

/// Best start offset of `pattern` in `text` near `loc`, or `None` when nothing scores under
/// the threshold. Offsets are in chars.
pub fn match_at(text: &[char], pattern: &[char], loc: usize, config: MatchConfig) -> Option<usize> {
    let m = pattern.len();
    if m == 0 || text.is_empty() {
        return None;
    }
    if text == pattern {
        return Some(0);
    }
    let loc = loc.min(text.len());
    if text.get(loc..loc + m) == Some(pattern) {
        return Some(loc);
    }

    let radius = config.radius();
    let first = loc.saturating_sub(radius);
    let last = (loc + radius).min(text.len());
    let window_end = (last + 2 * m).min(text.len());
    let errors = errors_by_start(&text[first..window_end], pattern);

    let mut best: Option<(f64, usize)> = None;
    for offset in first..=last {
        let e = errors[offset - first];
        if e >= m {
            continue;
        }
        let score = config.score(e, m, offset, loc);
        if score > config.threshold {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_score, best_offset)) => {
                score < best_score
                    || (score == best_score
                        && (offset.abs_diff(loc), offset < loc)
                            < (best_offset.abs_diff(loc), best_offset < loc))
            }
        };
        if better {
            best = Some((score, offset));
        }
    }
    best.map(|(_, offset)| offset)
}

/// For every start offset `s` in `window` (plus one past the end), the fewest edits needed
/// to turn some substring beginning at `s` into `pattern`.
///
/// Runs Sellers' free-start recurrence over the reversed window and pattern, so a match
/// ending at reversed position `j` is a match starting at `len - j`.
fn errors_by_start(window: &[char], pattern: &[char]) -> Vec<usize> {
    let n = window.len();
    let m = pattern.len();
    let mut by_start = vec![m; n + 1];
    let mut column: Vec<usize> = (0..=m).collect();
    let mut next = vec![0usize; m + 1];
    by_start[n] = column[m];
    for (j, &ch) in window.iter().rev().enumerate() {
        next[0] = 0;
        for i in 1..=m {
            let substitute = column[i - 1] + usize::from(pattern[m - i] != ch);
            next[i] = substitute.min(column[i] + 1).min(next[i - 1] + 1);
        }
        std::mem::swap(&mut column, &mut next);
        by_start[n - (j + 1)] = column[m];
    }
    by_start
}

/// A target file flattened to chars, with the offset at which each line begins.
pub struct Locator<'a> {
    text: Vec<char>,
    line_starts: Vec<usize>,
    settings: &'a LocatorSettings,
}

impl<'a> Locator<'a> {
    pub fn new(lines: &[String], settings: &'a LocatorSettings) -> Self {
        let mut text = Vec::new();
        let mut line_starts = Vec::with_capacity(lines.len());
        for line in lines {
            line_starts.push(text.len());
            text.extend(line.chars());
            text.push('\n');
        }
        Self {
            text,
            line_starts,
            settings,
        }
    }

    /// 1-based line at which `pattern_lines` most plausibly starts, searching outward from
    /// `anchor_line` when the retry policy allows it.
    pub fn locate<S: AsRef<str>>(&self, pattern_lines: &[S], anchor_line: usize) -> Option<usize> {
        let pattern: Vec<char> = pattern_lines
            .iter()
            .map(|line| line.as_ref())
            .collect::<Vec<&str>>()
            .join("\n")
            .chars()
            .collect();
        if pattern.is_empty() {
            return None;
        }
        let loc = self.offset_of(anchor_line);
        let base = match self.settings.retry {
            Some(retry) => self.span(anchor_line, retry.interval),
            None => self.settings.base_distance as f64,
        };
        if let Some(found) = self.escalate(&pattern, loc, base) {
            return Some(self.line_of(found));
        }
        let retry = self.settings.retry?;
        self.probe_outward(&pattern, anchor_line, loc, retry)
            .map(|found| self.line_of(found))
    }

    fn escalate(&self, pattern: &[char], loc: usize, base: f64) -> Option<usize> {
        self.settings
            .passes(base)
            .into_iter()
            .find_map(|config| match_at(&self.text, pattern, loc, config))
    }

    fn probe_outward(
        &self,
        pattern: &[char],
        anchor_line: usize,
        loc: usize,
        retry: RetryPolicy,
    ) -> Option<usize> {
        let reach = retry.interval + self.settings.overlap;
        for step in 1..=retry.times {
            let shift = step * retry.interval;
            let above = anchor_line.checked_sub(shift).filter(|&line| self.has_line(line));
            let below = (anchor_line + shift)
                .checked_sub(self.settings.overlap)
                .filter(|&line| self.has_line(line));
            if above.is_none() && below.is_none() {
                break;
            }
            let above_passes = above.map(|line| (line, self.settings.passes(self.span(line, reach))));
            let below_passes = below.map(|line| (line, self.settings.passes(self.span(line, reach))));

            for pass in 0..self.settings.thresholds.len() {
                let probe = |side: &Option<(usize, Vec<MatchConfig>)>| {
                    side.as_ref().and_then(|(line, passes)| {
                        match_at(&self.text, pattern, self.offset_of(*line), passes[pass])
                    })
                };
                match (probe(&above_passes), probe(&below_passes)) {
                    (None, None) => continue,
                    (Some(found), None) | (None, Some(found)) => return Some(found),
                    (Some(up), Some(down)) => return Some(self.prefer(pattern, loc, up, down)),
                }
            }
        }
        None
    }

    /// Picks between an upward and a downward candidate: better similarity first, then
    /// nearness to the anchor, then the downward one.
    fn prefer(&self, pattern: &[char], loc: usize, up: usize, down: usize) -> usize {
        let pattern_text: String = pattern.iter().collect();
        let up_ratio = ratio(&pattern_text, &self.slice(up, pattern.len()));
        let down_ratio = ratio(&pattern_text, &self.slice(down, pattern.len()));
        if up_ratio > down_ratio {
            up
        } else if down_ratio > up_ratio {
            down
        } else if loc.abs_diff(up) < loc.abs_diff(down) {
            up
        } else {
            down
        }
    }

    fn slice(&self, start: usize, len: usize) -> String {
        let end = (start + len).min(self.text.len());
        self.text[start.min(end)..end].iter().collect()
    }

    fn has_line(&self, line: usize) -> bool {
        line >= 1 && line <= self.line_starts.len()
    }

    /// Char offset where `line` starts; lines past the end map to the end of the text.
    fn offset_of(&self, line: usize) -> usize {
        if self.has_line(line) {
            self.line_starts[line - 1]
        } else {
            self.text.len()
        }
    }

    /// Char length of `count` lines starting at `line`, or the base distance when the file
    /// ends first.
    fn span(&self, line: usize, count: usize) -> f64 {
        let end_line = line + count;
        if self.has_line(end_line) && self.has_line(line) {
            (self.offset_of(end_line) - self.offset_of(line)) as f64
        } else {
            self.settings.base_distance as f64
        }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.line_starts
            .partition_point(|&start| start <= offset)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: [&str; 3] = ["fn_alpha(one, two);", "fn_gamma(three, 4);", "return status_ok();"];
    const FILLER: &str = "xxxxxxxxxxxxxxxxxxx";

    fn file_with_blocks(total: usize, starts: &[usize]) -> Vec<String> {
        let mut lines = vec![FILLER.to_string(); total];
        for &start in starts {
            for (idx, text) in BLOCK.iter().enumerate() {
                lines[start - 1 + idx] = text.to_string();
            }
        }
        lines
    }

    fn chars(text: &str) -> Vec<char> {
        text.chars().collect()
    }

    fn no_retry() -> LocatorSettings {
        LocatorSettings {
            retry: None,
            ..LocatorSettings::default()
        }
    }

    #[test]
    fn exact_block_at_anchor() {
        let lines = file_with_blocks(40, &[10]);
        let settings = no_retry();
        assert_eq!(Locator::new(&lines, &settings).locate(&BLOCK, 10), Some(10));
    }

    #[test]
    fn shifted_block_is_found_near_anchor() {
        let lines = file_with_blocks(40, &[12]);
        let settings = no_retry();
        assert_eq!(Locator::new(&lines, &settings).locate(&BLOCK, 10), Some(12));
    }

    #[test]
    fn empty_pattern_never_matches() {
        let lines = file_with_blocks(5, &[1]);
        let settings = no_retry();
        let empty: [&str; 0] = [];
        assert_eq!(Locator::new(&lines, &settings).locate(&empty, 1), None);
    }

    #[test]
    fn drifted_block_needs_a_looser_pass() {
        let mut lines = file_with_blocks(40, &[10]);
        lines[10] = "fn_gamma(three, 5);".to_string();
        let settings = no_retry();
        let locator = Locator::new(&lines, &settings);
        let pattern = chars(&BLOCK.join("\n"));
        let loc = locator.offset_of(10);
        let passes = settings.passes(settings.base_distance as f64);

        assert_eq!(match_at(&locator.text, &pattern, loc, passes[0]), None);
        assert_eq!(match_at(&locator.text, &pattern, loc, passes[1]), Some(loc));
        assert_eq!(locator.locate(&BLOCK, 10), Some(10));
    }

    #[test]
    fn looser_passes_never_lose_a_match() {
        let settings = no_retry();
        let passes = settings.passes(settings.base_distance as f64);
        let pattern = chars(&BLOCK.join("\n"));
        for shift in 0..6 {
            for drift in ["fn_gamma(three, 4);", "fn_gamma(three, 5);", "fn_gamma(thre, 44);"] {
                let mut lines = file_with_blocks(40, &[10 + shift]);
                lines[10 + shift] = drift.to_string();
                let locator = Locator::new(&lines, &settings);
                let loc = locator.offset_of(10);
                let found: Vec<bool> = passes
                    .iter()
                    .map(|config| match_at(&locator.text, &pattern, loc, *config).is_some())
                    .collect();
                for pair in found.windows(2) {
                    assert!(!pair[0] || pair[1], "shift {shift} drift {drift}: {found:?}");
                }
            }
        }
    }

    #[test]
    fn retry_reaches_block_beyond_first_window() {
        let lines = file_with_blocks(600, &[450]);
        let without = no_retry();
        assert_eq!(Locator::new(&lines, &without).locate(&BLOCK, 300), None);

        let with = LocatorSettings::default();
        assert_eq!(Locator::new(&lines, &with).locate(&BLOCK, 300), Some(450));
    }

    #[test]
    fn retry_prefers_the_closer_of_two_equal_candidates() {
        // Probes land on 200 (above) and 395 (below the overlap-shifted step).
        let lines = file_with_blocks(600, &[200, 395]);
        let settings = LocatorSettings::default();
        assert_eq!(Locator::new(&lines, &settings).locate(&BLOCK, 300), Some(395));
    }

    #[test]
    fn tie_break_prefers_similarity_then_distance_then_below() {
        let mut lines = file_with_blocks(60, &[10, 30, 50]);
        lines[10] = "fn_gamma(three, 5);".to_string();
        let settings = no_retry();
        let locator = Locator::new(&lines, &settings);
        let pattern = chars(&BLOCK.join("\n"));
        let (drifted, middle, exact) = (
            locator.offset_of(10),
            locator.offset_of(30),
            locator.offset_of(50),
        );

        assert_eq!(locator.prefer(&pattern, middle, drifted, exact), exact);
        let equidistant = locator.offset_of(40);
        assert_eq!(locator.prefer(&pattern, equidistant, middle, exact), exact);
        let near_middle = locator.offset_of(35);
        assert_eq!(locator.prefer(&pattern, near_middle, middle, exact), middle);
    }

    #[test]
    fn offsets_map_back_to_lines() {
        let lines: Vec<String> = ["ab", "", "cde"].iter().map(|s| s.to_string()).collect();
        let settings = no_retry();
        let locator = Locator::new(&lines, &settings);
        assert_eq!(locator.line_of(0), 1);
        assert_eq!(locator.line_of(2), 1);
        assert_eq!(locator.line_of(3), 2);
        assert_eq!(locator.line_of(4), 3);
        assert_eq!(locator.offset_of(99), locator.text.len());
    }

    #[test]
    fn errors_by_start_counts_edits() {
        let errors = errors_by_start(&chars("zabcz"), &chars("abc"));
        assert_eq!(errors[1], 0);
        assert_eq!(errors[0], 1);
        assert_eq!(errors[5], 3);
    }
}
