//! Scan configuration management.
//!
//! Holds the current [`ScanConfig`] in memory, backed by the store. Updates
//! are validated as a whole before anything is persisted; a rejected update
//! leaves both the cached and the stored configuration untouched.

use std::sync::{Arc, RwLock};

use lanwatch_core::config::{Preset, PresetInfo, ScanConfig, ScanConfigPatch, ValidationReport};
use lanwatch_core::error::ConfigError;
use lanwatch_store::Store;

use crate::error::{DiscoverError, Result};
use crate::subnet::{self, NetworkTestResult};

pub struct ConfigProvider {
    store: Arc<dyn Store>,
    current: RwLock<ScanConfig>,
}

impl ConfigProvider {
    /// Load the stored configuration, falling back to the default when
    /// nothing is stored or the stored document no longer validates.
    pub fn load(store: Arc<dyn Store>) -> Result<Self> {
        let config = match store.load_scan_config()? {
            Some(config) => match config.check() {
                Ok(()) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "Stored scan config invalid, using defaults");
                    ScanConfig::default()
                }
            },
            None => ScanConfig::default(),
        };
        Ok(Self {
            store,
            current: RwLock::new(config),
        })
    }

    pub fn get(&self) -> ScanConfig {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply and persist a partial update.
    pub fn update(&self, patch: &ScanConfigPatch) -> Result<ScanConfig> {
        let mut next = self.get();
        next.apply(patch);
        next.check()?;
        self.replace(next)
    }

    /// Check a partial update against the current configuration without
    /// applying it. Reports every violation.
    pub fn validate(&self, patch: &ScanConfigPatch) -> ValidationReport {
        let mut candidate = self.get();
        candidate.apply(patch);
        ValidationReport::from_errors(&candidate.validate())
    }

    pub fn test_network(&self, cidr: &str) -> NetworkTestResult {
        subnet::test_network(cidr)
    }

    pub fn list_presets(&self) -> Vec<PresetInfo> {
        Preset::ALL.iter().map(Preset::info).collect()
    }

    /// Apply a named preset's tuning, keeping the network section.
    pub fn load_preset(&self, name: &str) -> Result<ScanConfig> {
        let preset: Preset = name.parse()?;
        let next = self.get().with_preset(preset);
        next.check()?;
        let saved = self.replace(next)?;
        tracing::info!(preset = preset.name(), "Loaded scan preset");
        Ok(saved)
    }

    fn replace(&self, next: ScanConfig) -> Result<ScanConfig> {
        self.store.save_scan_config(&next)?;
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = next.clone();
        Ok(next)
    }
}

impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("current", &self.get())
            .finish_non_exhaustive()
    }
}

/// A patch for a single `key value` pair as typed on the command line.
///
/// The value is read as JSON first (`25`, `true`, `["icmp"]`) and as a
/// plain string when that does not fit the field (`2s`, `10.0.0.0/24`).
pub fn patch_from_pair(key: &str, value: &str) -> Result<ScanConfigPatch> {
    let single = |value: serde_json::Value| {
        let mut object = serde_json::Map::new();
        object.insert(key.to_string(), value);
        serde_json::from_value::<ScanConfigPatch>(serde_json::Value::Object(object))
    };
    if let Ok(Ok(patch)) = serde_json::from_str(value).map(single) {
        return Ok(patch);
    }
    single(serde_json::Value::String(value.to_string()))
        .map_err(|e| DiscoverError::Config(ConfigError::Malformed(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanwatch_core::config::MethodKind;
    use lanwatch_store::memory::MemoryStore;

    fn provider() -> (Arc<MemoryStore>, ConfigProvider) {
        let store = Arc::new(MemoryStore::new());
        let provider = ConfigProvider::load(store.clone()).unwrap();
        (store, provider)
    }

    #[test]
    fn defaults_to_balanced_when_empty() {
        let (_, provider) = provider();
        assert_eq!(provider.get(), Preset::Balanced.config());
    }

    #[test]
    fn invalid_stored_config_falls_back_to_default() {
        let store = Arc::new(MemoryStore::new());
        let broken = ScanConfig {
            scan_rate: 0,
            ..ScanConfig::default()
        };
        store.save_scan_config(&broken).unwrap();
        let provider = ConfigProvider::load(store).unwrap();
        assert_eq!(provider.get(), ScanConfig::default());
    }

    #[test]
    fn update_persists_valid_patch() {
        let (store, provider) = provider();
        let patch = ScanConfigPatch {
            subnet_cidr: Some("10.0.0.0/24".into()),
            scan_rate: Some(50),
            ..ScanConfigPatch::default()
        };
        let updated = provider.update(&patch).unwrap();
        assert_eq!(updated.subnet_cidr.as_deref(), Some("10.0.0.0/24"));
        assert_eq!(updated.scan_rate, 50);
        assert_eq!(store.load_scan_config().unwrap(), Some(updated));
    }

    #[test]
    fn rejected_update_changes_nothing() {
        let (store, provider) = provider();
        let patch = ScanConfigPatch {
            subnet_cidr: Some("not-a-cidr".into()),
            ..ScanConfigPatch::default()
        };
        assert!(matches!(
            provider.update(&patch),
            Err(DiscoverError::Config(ConfigError::InvalidCidr(_)))
        ));
        assert_eq!(provider.get(), ScanConfig::default());
        assert_eq!(store.load_scan_config().unwrap(), None);
    }

    #[test]
    fn validate_reports_every_error() {
        let (_, provider) = provider();
        let patch = ScanConfigPatch {
            scan_rate: Some(5000),
            scan_timeout: Some("soon".into()),
            ping_methods: Some(vec![]),
            ..ScanConfigPatch::default()
        };
        let report = provider.validate(&patch);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 3);
        // Validation never applies anything.
        assert_eq!(provider.get(), ScanConfig::default());
    }

    #[test]
    fn load_preset_keeps_network_section() {
        let (store, provider) = provider();
        provider
            .update(&ScanConfigPatch {
                subnet_cidr: Some("192.168.7.0/24".into()),
                exclude_ips: Some(vec!["192.168.7.1".into()]),
                ..ScanConfigPatch::default()
            })
            .unwrap();

        let loaded = provider.load_preset("stealth").unwrap();
        assert_eq!(loaded.scan_rate, Preset::Stealth.config().scan_rate);
        assert_eq!(loaded.subnet_cidr.as_deref(), Some("192.168.7.0/24"));
        assert_eq!(loaded.exclude_ips, vec!["192.168.7.1".to_string()]);
        assert_eq!(store.load_scan_config().unwrap(), Some(loaded));
    }

    #[test]
    fn unknown_preset_is_config_error() {
        let (_, provider) = provider();
        assert!(matches!(
            provider.load_preset("ludicrous"),
            Err(DiscoverError::Config(ConfigError::UnknownPreset(_)))
        ));
    }

    #[test]
    fn presets_are_listed_in_order() {
        let (_, provider) = provider();
        let names: Vec<_> = provider.list_presets().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["fast", "balanced", "thorough", "stealth"]);
    }

    #[test]
    fn patch_from_cli_pair() {
        let patch = patch_from_pair("scan_rate", "25").unwrap();
        assert_eq!(patch.scan_rate, Some(25));

        let patch = patch_from_pair("scan_timeout", "2s").unwrap();
        assert_eq!(patch.scan_timeout.as_deref(), Some("2s"));

        let patch = patch_from_pair("ping_methods", r#"["icmp","arp"]"#).unwrap();
        assert_eq!(patch.ping_methods, Some(vec![MethodKind::Icmp, MethodKind::Arp]));

        assert!(patch_from_pair("no_such_key", "1").is_err());
    }
}
