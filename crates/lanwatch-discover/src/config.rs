//! Daemon settings for the lanwatch-discover engine.
//!
//! Scan parameters live in [`lanwatch_core::config::ScanConfig`] and are
//! managed through the [`ConfigProvider`](crate::provider::ConfigProvider).
//! This module only covers process-level settings.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level discover configuration.
///
/// Loaded from `lanwatch.toml` `[discover]` section or
/// `LANWATCH_DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DiscoverConfig {
    /// Directory holding devices, records, sessions, and the scan config.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Seconds between scheduled passes.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Whether the daemon runs scheduled passes at all.
    #[serde(default = "default_true")]
    pub auto_scan_enabled: bool,

    /// Scan records and closed sessions older than this are pruned.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Capacity of the presence event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Optional IEEE `oui.txt` registry to extend the built-in vendor table.
    #[serde(default)]
    pub oui_file: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_scan_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

fn default_event_buffer() -> usize {
    256
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            scan_interval_secs: default_scan_interval(),
            auto_scan_enabled: true,
            retention_days: default_retention_days(),
            event_buffer: default_event_buffer(),
            oui_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DiscoverConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.scan_interval_secs, 300);
        assert!(config.auto_scan_enabled);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.oui_file, None);
    }

    #[test]
    fn test_partial_table_uses_defaults() {
        let config: DiscoverConfig =
            serde_json::from_str(r#"{"scan_interval_secs": 60, "auto_scan_enabled": false}"#)
                .unwrap();
        assert_eq!(config.scan_interval_secs, 60);
        assert!(!config.auto_scan_enabled);
        assert_eq!(config.event_buffer, 256);
    }
}
