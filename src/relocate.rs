//! Finding where a file the patch names has moved to.

use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Result, anyhow};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use crate::patch::Hunk;
use crate::text::{EncodingStrategy, TargetText};

pub trait Relocate {
    /// A root-relative path believed to hold the hunk's content, if any.
    fn relocate(&self, hunk: &Hunk) -> Option<PathBuf>;
}

pub const DEFAULT_EXCLUDES: [&str; 3] = ["target/**", "node_modules/**", "**/*.bak*"];

/// Searches the repository tree for a same-named file that contains the hunk's pre-image.
pub struct TreeRelocator {
    root: PathBuf,
    exclude: Option<GlobSet>,
    strategy: EncodingStrategy,
}

impl TreeRelocator {
    pub fn new(root: &Path, exclude: &[String], strategy: EncodingStrategy) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            exclude: build_exclude_globs(exclude)?,
            strategy,
        })
    }

    pub fn with_default_excludes(root: &Path, strategy: EncodingStrategy) -> Result<Self> {
        let patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
        Self::new(root, &patterns, strategy)
    }

    fn candidates(&self, needle: &Path) -> BTreeSet<PathBuf> {
        let mut found = BTreeSet::new();
        if let Some(hit) = self.probe_suffixes(needle) {
            found.insert(hit);
        }
        let Some(name) = needle.file_name() else {
            return found;
        };
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
        for entry in walker.flatten() {
            if !entry.file_type().is_file() || entry.file_name() != name {
                continue;
            }
            let path = entry.into_path();
            if !self.is_excluded(&path) {
                found.insert(path);
            }
        }
        found
    }

    /// Climbs from the expected directory toward the root, trying every suffix of the
    /// expected path there and inside sibling directories.
    fn probe_suffixes(&self, needle: &Path) -> Option<PathBuf> {
        let suffixes = collect_suffixes(needle);
        if suffixes.is_empty() {
            return None;
        }
        let file_names = collect_simple_names(&suffixes);
        let mut current = self.root.join(needle.parent().unwrap_or(Path::new("")));
        let mut checked = HashSet::new();
        checked.insert(self.root.join(needle));
        while current.starts_with(&self.root) {
            if let Some(hit) = try_direct_candidates(&current, &suffixes, &mut checked) {
                return Some(hit);
            }
            if let Some(hit) =
                search_sibling_directories(&current, &suffixes, &file_names, &mut checked)
            {
                return Some(hit);
            }
            if !current.pop() {
                break;
            }
        }
        None
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let Some(set) = &self.exclude else {
            return false;
        };
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        set.is_match(normalize_slashes(relative).as_str())
    }

    /// Number of the hunk's non-blank pre-image lines present verbatim (trimmed) in `path`.
    fn containment(&self, path: &Path, wanted: &HashSet<&str>) -> usize {
        let Ok(text) = TargetText::read(path, &self.strategy) else {
            return 0;
        };
        let present: HashSet<&str> = text.lines.iter().map(|line| line.trim()).collect();
        wanted.iter().filter(|line| present.contains(*line)).count()
    }
}

impl Relocate for TreeRelocator {
    fn relocate(&self, hunk: &Hunk) -> Option<PathBuf> {
        let wanted: HashSet<&str> = hunk
            .before_lines()
            .map(|line| line.text.trim())
            .filter(|text| !text.is_empty())
            .collect();
        self.candidates(&hunk.path)
            .into_iter()
            .filter(|path| !self.is_excluded(path))
            .map(|path| {
                let hits = self.containment(&path, &wanted);
                let shared = shared_suffix(&path, &hunk.path);
                (hits, shared, path)
            })
            .filter(|(hits, _, _)| *hits > 0 || wanted.is_empty())
            .max_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)).then_with(|| b.2.cmp(&a.2)))
            .and_then(|(_, _, path)| path.strip_prefix(&self.root).ok().map(Path::to_path_buf))
    }
}

fn shared_suffix(candidate: &Path, needle: &Path) -> usize {
    candidate
        .components()
        .rev()
        .zip(needle.components().rev())
        .take_while(|(a, b)| a == b)
        .count()
}

fn build_exclude_globs(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).map_err(|err| anyhow!("invalid exclude glob '{pattern}': {err}"))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|err| anyhow!("unable to build exclude globs: {err}"))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn normalize_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// `a/b/c.h`, `b/c.h`, `c.h`: every tail of the expected path, longest first.
fn collect_suffixes(needle: &Path) -> Vec<PathBuf> {
    let components: Vec<&std::ffi::OsStr> = needle
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name),
            _ => None,
        })
        .collect();
    let mut seen = HashSet::new();
    let mut suffixes = Vec::new();
    for idx in 0..components.len() {
        let suffix: PathBuf = components[idx..].iter().collect();
        if seen.insert(suffix.clone()) {
            suffixes.push(suffix);
        }
    }
    suffixes
}

fn collect_simple_names(suffixes: &[PathBuf]) -> Vec<OsString> {
    suffixes
        .iter()
        .filter(|suffix| suffix.components().count() == 1)
        .filter_map(|suffix| suffix.file_name().map(|name| name.to_os_string()))
        .collect()
}

fn try_direct_candidates(
    current: &Path,
    suffixes: &[PathBuf],
    checked: &mut HashSet<PathBuf>,
) -> Option<PathBuf> {
    suffixes
        .iter()
        .find_map(|suffix| check_candidate(current.join(suffix), checked))
}

fn search_sibling_directories(
    current: &Path,
    suffixes: &[PathBuf],
    simple_names: &[OsString],
    checked: &mut HashSet<PathBuf>,
) -> Option<PathBuf> {
    const MAX_SIBLINGS: usize = 256;
    let iter = fs::read_dir(current).ok()?;
    let mut entries: Vec<PathBuf> = iter
        .flatten()
        .take(MAX_SIBLINGS)
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));
            if hidden {
                continue;
            }
            for suffix in suffixes {
                if let Some(hit) = check_candidate(path.join(suffix), checked) {
                    return Some(hit);
                }
            }
        } else if path
            .file_name()
            .is_some_and(|name| simple_names.iter().any(|target| target == name))
        {
            if let Some(hit) = check_candidate(path.clone(), checked) {
                return Some(hit);
            }
        }
    }
    None
}

fn check_candidate(candidate: PathBuf, checked: &mut HashSet<PathBuf>) -> Option<PathBuf> {
    if !checked.insert(candidate.clone()) {
        return None;
    }
    candidate.is_file().then_some(candidate)
}
