use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

#[derive(Debug, Clone, Default)]
pub struct EncodingStrategy {
    override_encoding: Option<&'static Encoding>,
}

impl EncodingStrategy {
    pub fn new(override_label: Option<&str>) -> Result<Self> {
        let Some(label) = override_label else {
            return Ok(Self::default());
        };
        let trimmed = label.trim();
        let encoding = Encoding::for_label(trimmed.as_bytes())
            .ok_or_else(|| anyhow!("unknown encoding override '{trimmed}'"))?;
        Ok(Self {
            override_encoding: Some(encoding),
        })
    }

    pub fn describe(&self) -> String {
        match self.override_encoding {
            Some(enc) => format!("override {}", enc.name()),
            None => "auto-detect (BOM → UTF-8 → detector)".to_string(),
        }
    }

    fn decide(&self, bytes: &[u8]) -> &'static Encoding {
        if let Some(encoding) = self.override_encoding {
            return encoding;
        }
        if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
            return UTF_8;
        }
        if bytes.starts_with(&[0xFF, 0xFE]) {
            return UTF_16LE;
        }
        if bytes.starts_with(&[0xFE, 0xFF]) {
            return UTF_16BE;
        }
        if std::str::from_utf8(bytes).is_ok() {
            return UTF_8;
        }
        let mut detector = EncodingDetector::new();
        detector.feed(bytes, true);
        detector.guess(None, true)
    }
}

/// A target file held fully in memory as `\n`-free lines.
#[derive(Debug, Clone)]
pub struct TargetText {
    pub lines: Vec<String>,
    pub encoding: &'static Encoding,
    pub had_errors: bool,
}

impl TargetText {
    pub fn read(path: &Path, strategy: &EncodingStrategy) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let encoding = strategy.decide(&bytes);
        let (decoded, _, had_errors) = encoding.decode(&bytes);
        Ok(Self {
            lines: split_lines(&decoded),
            encoding,
            had_errors,
        })
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            lines: split_lines(text),
            encoding: UTF_8,
            had_errors: false,
        }
    }

    /// The whole file with `\n` endings, as it would be written back.
    pub fn joined(&self) -> String {
        join_lines(&self.lines)
    }
}

/// Splits on `\n`, `\r\n` or lone `\r`; a trailing terminator adds no empty line.
pub fn split_lines(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let body = normalized.strip_suffix('\n').unwrap_or(&normalized);
    if body.is_empty() && normalized.is_empty() {
        return Vec::new();
    }
    body.split('\n').map(str::to_string).collect()
}

pub fn join_lines(lines: &[String]) -> String {
    let mut text = String::with_capacity(lines.iter().map(|line| line.len() + 1).sum());
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub backup: bool,
    pub undo_dir: Option<PathBuf>,
}

/// What a write left behind besides the new content.
#[derive(Debug, Default)]
pub struct WriteReceipt {
    pub backup: Option<PathBuf>,
    pub undo_patch: Option<PathBuf>,
}

/// Rewrites `path` with `lines`, keeping the file's encoding and normalizing to `\n`.
pub fn write_lines(
    path: &Path,
    previous: &TargetText,
    lines: &[String],
    options: &WriteOptions,
) -> Result<WriteReceipt> {
    let new_text = join_lines(lines);
    let mut receipt = WriteReceipt::default();
    if let Some(dir) = &options.undo_dir {
        receipt.undo_patch = Some(write_undo_patch(dir, path, &previous.joined(), &new_text)?);
    }
    let (encoded, _, _) = previous.encoding.encode(&new_text);
    if options.backup {
        receipt.backup = create_backup(path)?;
    }
    write_via_temp(path, encoded.as_ref()).with_context(|| format!("writing {}", path.display()))?;
    Ok(receipt)
}

fn create_backup(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut attempt = 0usize;
    loop {
        let candidate = backup_candidate(path, attempt);
        if !candidate.exists() {
            fs::copy(path, &candidate)
                .with_context(|| format!("creating backup {}", candidate.display()))?;
            return Ok(Some(candidate));
        }
        attempt += 1;
    }
}

fn backup_candidate(path: &Path, index: usize) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("patchmend_file");
    let suffix = if index == 0 {
        ".bak".to_string()
    } else {
        format!(".bak{index}")
    };
    path.with_file_name(format!("{name}{suffix}"))
}

fn write_via_temp(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let base_dir = parent.unwrap_or_else(|| Path::new("."));
    let unique = format!(
        ".patchmend-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    );
    let temp_path = base_dir.join(unique);
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("creating temp file {}", temp_path.display()))?;
        file.write_all(data)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    }
    fs::rename(&temp_path, path).or_else(|err| {
        let _ = fs::remove_file(&temp_path);
        Err(err).with_context(|| format!("replacing {}", path.display()))
    })
}

fn write_undo_patch(dir: &Path, path: &Path, old_text: &str, new_text: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating undo dir {}", dir.display()))?;
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".into());
    let patch_path = dir.join(format!("{}_{}.patch", sanitize(&timestamp), sanitize_path(path)));
    fs::write(&patch_path, crate::diff::undo_patch(path, old_text, new_text))
        .with_context(|| format!("writing undo patch {}", patch_path.display()))?;
    Ok(patch_path)
}

fn sanitize_path(path: &Path) -> String {
    sanitize(&path.display().to_string())
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect()
}
