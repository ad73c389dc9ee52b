use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub const LOG_DIR: &str = ".patchmend";
const LOG_FILE: &str = "resolution_log.jsonl";
const MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub timestamp: String,
    pub command: String,
    pub path: PathBuf,
    pub hunk: String,
    pub action: String,
    pub detail: String,
}

/// Append-only JSON-lines trail of every decision a run makes, capped at the newest entries.
#[derive(Debug, Clone)]
pub struct ResolutionLog {
    dir: PathBuf,
}

impl Default for ResolutionLog {
    fn default() -> Self {
        Self::in_dir(LOG_DIR)
    }
}

impl ResolutionLog {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn record(
        &self,
        command: &str,
        path: &Path,
        hunk: &str,
        action: &str,
        detail: &str,
    ) -> Result<()> {
        let log_path = self.ensure_log_file()?;
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".into());
        let entry = ResolutionEntry {
            timestamp,
            command: command.to_string(),
            path: path.to_path_buf(),
            hunk: hunk.to_string(),
            action: action.to_string(),
            detail: detail.to_string(),
        };
        let json = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .with_context(|| format!("opening {log_path:?}"))?;
        writeln!(file, "{json}")?;
        truncate_log(&log_path)?;
        Ok(())
    }

    /// The last `count` entries, oldest first. Lines that do not parse are skipped.
    pub fn tail(&self, count: usize) -> Result<Vec<ResolutionEntry>> {
        let log_path = self.path();
        if !log_path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new()
            .read(true)
            .open(&log_path)
            .with_context(|| format!("reading {log_path:?}"))?;
        let entries: Vec<ResolutionEntry> = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        let skip = entries.len().saturating_sub(count);
        Ok(entries.into_iter().skip(skip).collect())
    }

    fn ensure_log_file(&self) -> Result<PathBuf> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).with_context(|| format!("creating {:?}", self.dir))?;
        }
        Ok(self.path())
    }
}

fn truncate_log(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("reading {path:?}"))?;
    let reader = BufReader::new(file);
    let lines: Vec<_> = reader.lines().collect::<Result<_, _>>()?;
    if lines.len() <= MAX_ENTRIES {
        return Ok(());
    }
    let keep = &lines[lines.len() - MAX_ENTRIES..];
    fs::write(path, keep.join("\n") + "\n")?;
    Ok(())
}
