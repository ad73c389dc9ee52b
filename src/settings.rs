use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::locate::{LocatorSettings, RetryPolicy};

/// Every tunable of a reconciliation run, passed by value into each component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Line similarity above which a file line counts as the same line, drifted.
    pub similarity_ratio: f64,
    /// Extra file lines read past the hunk's own length when reconciling.
    pub window_buffer: usize,
    /// Missing context lines tolerated before a rewrite is refused.
    pub max_missing_context: usize,
    pub locator: LocatorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            similarity_ratio: 0.8,
            window_buffer: 10,
            max_missing_context: 2,
            locator: LocatorSettings::default(),
        }
    }
}

impl Settings {
    /// Reads overrides from YAML, or JSON when the file ends in `.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
        let settings: Settings = if path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
        {
            serde_json::from_slice(&data)
                .with_context(|| format!("parsing JSON config {}", path.display()))?
        } else {
            serde_yaml::from_slice(&data)
                .with_context(|| format!("parsing YAML config {}", path.display()))?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Applies command-line retry flags; either flag alone keeps the other's current value.
    pub fn with_retry(mut self, times: Option<usize>, interval: Option<usize>) -> Self {
        if times.is_none() && interval.is_none() {
            return self;
        }
        let current = self.locator.retry.unwrap_or_default();
        let retry = RetryPolicy {
            times: times.unwrap_or(current.times),
            interval: interval.unwrap_or(current.interval),
        };
        self.locator.retry = (retry.times > 0 && retry.interval > 0).then_some(retry);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_ratio) {
            bail!("similarity_ratio must be within 0..=1, got {}", self.similarity_ratio);
        }
        if self.locator.thresholds.is_empty() {
            bail!("locator.thresholds must list at least one pass");
        }
        if self
            .locator
            .thresholds
            .windows(2)
            .any(|pair| pair[0] > pair[1])
        {
            bail!("locator.thresholds must be ordered strictest first");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_constants() {
        let settings = Settings::default();
        assert_eq!(settings.similarity_ratio, 0.8);
        assert_eq!(settings.window_buffer, 10);
        assert_eq!(settings.locator.thresholds, vec![0.01, 0.2, 0.5]);
        assert_eq!(settings.locator.overlap, 5);
        assert_eq!(settings.locator.retry, Some(RetryPolicy { times: 2, interval: 100 }));
    }

    #[test]
    fn yaml_and_json_overrides_merge_with_defaults() {
        let dir = tempdir().expect("temp dir");
        let yaml = dir.path().join("patchmend.yaml");
        fs::write(&yaml, "similarity_ratio: 0.9\nlocator:\n  base_distance: 3000\n").expect("yaml");
        let settings = Settings::load(&yaml).expect("load yaml");
        assert_eq!(settings.similarity_ratio, 0.9);
        assert_eq!(settings.locator.base_distance, 3000);
        assert_eq!(settings.locator.thresholds, vec![0.01, 0.2, 0.5]);

        let json = dir.path().join("patchmend.json");
        fs::write(&json, r#"{"window_buffer": 4, "locator": {"retry": null}}"#).expect("json");
        let settings = Settings::load(&json).expect("load json");
        assert_eq!(settings.window_buffer, 4);
        assert_eq!(settings.locator.retry, None);
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "locator:\n  thresholds: [0.5, 0.2]\n").expect("yaml");
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn retry_flags_override_one_field_at_a_time() {
        let settings = Settings::default().with_retry(Some(4), None);
        assert_eq!(settings.locator.retry, Some(RetryPolicy { times: 4, interval: 100 }));
        let disabled = Settings::default().with_retry(Some(0), None);
        assert_eq!(disabled.locator.retry, None);
        assert_eq!(Settings::default().with_retry(None, None), Settings::default());
    }
}
