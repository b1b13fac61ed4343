//! Harvester settings and per-run options.
//!
//! The settings file is written by the registration flow; this crate only reads it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{HarvestError, HarvestResult};
use crate::harvest::observer::HarvestSeverity;

/// Environment variable that overrides the settings file location.
pub const SETTINGS_FILE_ENV: &str = "HARVESTER_SETTINGS_FILE";
/// Settings file location when neither an explicit path nor the env var is given.
pub const DEFAULT_SETTINGS_FILE: &str = "./.harvester/settings.json";
/// Rows per partition when the monitored path does not override it.
pub const DEFAULT_PARTITION_ROWS: usize = 100_000;
/// Rows drawn for the data summary.
pub const DEFAULT_SUMMARY_ROWS: usize = 10;

/// A filesystem root the harvester scans, owned by a remote entity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitoredPath {
    /// Identifier of the remote entity that receives reports for files under `path`.
    pub id: String,
    /// Root directory.
    pub path: PathBuf,
    /// Optional regular expression matched (anywhere) against paths relative to `path`.
    #[serde(default)]
    pub regex: Option<String>,
    /// Inactive paths are skipped by the runner.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Maximum rows per partition.
    #[serde(default)]
    pub max_partition_line_count: Option<usize>,
    /// Seconds a file must be unchanged before the service considers it stable.
    #[serde(default)]
    pub stable_time: Option<u64>,
}

fn default_active() -> bool {
    true
}

impl MonitoredPath {
    /// A monitored path with no filter and default partition size.
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            regex: None,
            active: true,
            max_partition_line_count: None,
            stable_time: None,
        }
    }

    /// Effective partition row limit.
    pub fn partition_rows(&self, options: &HarvestOptions) -> usize {
        self.max_partition_line_count
            .filter(|n| *n > 0)
            .unwrap_or(options.default_partition_rows)
    }
}

/// Settings shared by all monitored paths.
#[derive(Debug, Clone, Deserialize)]
pub struct HarvesterSettings {
    /// Base URL of the reporting service, ending in `/`.
    pub url: String,
    /// Key sent as `Authorization: Harvester <key>`.
    pub api_key: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Seconds between harvest cycles (used by the external scheduler).
    #[serde(default)]
    pub sleep_time: Option<u64>,
    #[serde(default)]
    pub max_upload_bytes: Option<u64>,
    #[serde(default)]
    pub monitored_paths: Vec<MonitoredPath>,
}

impl HarvesterSettings {
    /// Parse settings from JSON text.
    pub fn from_json(text: &str) -> HarvestResult<Self> {
        let settings: HarvesterSettings = serde_json::from_str(text)?;
        if settings.url.is_empty() {
            return Err(HarvestError::Config {
                message: "settings have an empty 'url'".to_string(),
            });
        }
        Ok(settings)
    }

    /// Load settings from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> HarvestResult<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(settings_file);
        let text = fs::read_to_string(&path).map_err(|e| HarvestError::Config {
            message: format!("cannot read settings file {}: {e}", path.display()),
        })?;
        Self::from_json(&text)
    }
}

/// Resolve the settings file location.
pub fn settings_file() -> PathBuf {
    std::env::var_os(SETTINGS_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
}

/// Options controlling a harvest attempt.
///
/// Use [`Default`] for common cases.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Producer version recorded in every partition's metadata.
    pub producer_version: String,
    /// Rows drawn for the data summary.
    pub summary_rows: usize,
    /// Partition size when the monitored path does not set one.
    pub default_partition_rows: usize,
    /// Where per-file scratch directories are created (system temp dir when `None`).
    pub scratch_root: Option<PathBuf>,
    /// Whether to render the visualization artifact.
    pub render_plot: bool,
    /// Severity at which observers' `on_alert` is invoked.
    pub alert_at_or_above: HarvestSeverity,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            summary_rows: DEFAULT_SUMMARY_ROWS,
            default_partition_rows: DEFAULT_PARTITION_ROWS,
            scratch_root: None,
            render_plot: true,
            alert_at_or_above: HarvestSeverity::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_parse_with_defaults() {
        let settings = HarvesterSettings::from_json(
            r#"{
                "url": "http://app/harvesters/",
                "api_key": "hrv_x",
                "sleep_time": 0,
                "monitored_paths": [
                    {"id": "p1", "path": "/data", "regex": "\\.csv$"},
                    {"id": "p2", "path": "/other", "active": false, "max_partition_line_count": 50}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(settings.monitored_paths.len(), 2);
        assert!(settings.monitored_paths[0].active);
        assert!(!settings.monitored_paths[1].active);

        let opts = HarvestOptions::default();
        assert_eq!(settings.monitored_paths[0].partition_rows(&opts), 100_000);
        assert_eq!(settings.monitored_paths[1].partition_rows(&opts), 50);
    }

    #[test]
    fn empty_url_is_rejected() {
        let err = HarvesterSettings::from_json(r#"{"url": "", "api_key": "k"}"#).unwrap_err();
        assert!(err.to_string().contains("configuration error"));
    }
}
