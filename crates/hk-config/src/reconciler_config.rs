//! Reconciler configuration (`configuration.yaml`)

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hk_core::PairingId;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Main configuration file, relative to the config directory
pub const CONFIG_FILE: &str = "configuration.yaml";

/// Backoff for live reconnection attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub max_exponent: u32,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_exponent: 4,
            jitter_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

/// One paired accessory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingConfig {
    pub pairing_id: PairingId,
    /// Accessory database (HAP JSON) served by the simulated transport.
    /// Without one the pairing runs cached-only.
    #[serde(default)]
    pub accessories: Option<PathBuf>,
    #[serde(default = "default_config_num")]
    pub config_num: u64,
}

fn default_config_num() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_setup_retry_secs() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Directory holding `.storage/`; defaults to the config directory
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Default tracing filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Delay before the host sets up a pairing again after it was marked
    /// not ready
    #[serde(default = "default_setup_retry_secs")]
    pub setup_retry_secs: u64,

    #[serde(default)]
    pub pairings: Vec<PairingConfig>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            log_level: default_log_level(),
            retry: RetryConfig::default(),
            setup_retry_secs: default_setup_retry_secs(),
            pairings: Vec::new(),
        }
    }
}

impl ReconcilerConfig {
    /// Load and validate `configuration.yaml` from a config directory
    ///
    /// A missing file yields the defaults.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.join(CONFIG_FILE).exists() {
            tracing::info!("No {} in {:?}, using defaults", CONFIG_FILE, config_dir);
            return Ok(Self::default());
        }

        let yaml = load_yaml(config_dir, CONFIG_FILE)?;
        let config = Self::from_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML value
    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        if yaml.is_null() {
            return Ok(Self::default());
        }
        if !yaml.is_mapping() {
            return Err(ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            });
        }

        serde_yaml::from_value(yaml).map_err(|e| ConfigError::InvalidValue {
            key: "root".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry.base_delay_secs == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "retry.base_delay_secs must be greater than zero".to_string(),
            });
        }
        if self.setup_retry_secs == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "setup_retry_secs must be greater than zero".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for pairing in &self.pairings {
            if !seen.insert(&pairing.pairing_id) {
                return Err(ConfigError::ValidationFailed {
                    message: format!("duplicate pairing_id '{}'", pairing.pairing_id),
                });
            }
        }
        Ok(())
    }

    /// Directory that holds `.storage/`
    pub fn storage_root(&self, config_dir: &Path) -> PathBuf {
        match &self.storage_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => config_dir.join(dir),
            None => config_dir.to_path_buf(),
        }
    }

    /// Accessory database path for a pairing, resolved against the config dir
    pub fn accessories_path(&self, config_dir: &Path, pairing: &PairingConfig) -> Option<PathBuf> {
        pairing.accessories.as_ref().map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                config_dir.join(path)
            }
        })
    }

    pub fn setup_retry_delay(&self) -> Duration {
        Duration::from_secs(self.setup_retry_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::from_yaml(Value::Null).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.retry.base_delay(), Duration::from_secs(5));
        assert_eq!(config.retry.max_jitter(), Duration::from_millis(100));
        assert_eq!(config.setup_retry_delay(), Duration::from_secs(300));
        assert!(config.pairings.is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
storage_dir: data
log_level: debug
retry:
  base_delay_secs: 2
setup_retry_secs: 60
pairings:
  - pairing_id: "00:00:00:00:00:00"
    accessories: devices/ecobee3.json
    config_num: 3
  - pairing_id: "aa:bb:cc:dd:ee:ff"
"#,
        )
        .unwrap();

        let config = ReconcilerConfig::load(dir.path()).unwrap();

        assert_eq!(config.retry.base_delay_secs, 2);
        assert_eq!(config.retry.max_exponent, 4);
        assert_eq!(config.storage_root(dir.path()), dir.path().join("data"));
        assert_eq!(config.pairings.len(), 2);
        assert_eq!(config.pairings[0].config_num, 3);
        assert_eq!(
            config.accessories_path(dir.path(), &config.pairings[0]),
            Some(dir.path().join("devices/ecobee3.json"))
        );
        assert_eq!(config.pairings[1].config_num, 1);
        assert_eq!(config.accessories_path(dir.path(), &config.pairings[1]), None);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ReconcilerConfig::load(dir.path()).unwrap();
        assert_eq!(config, ReconcilerConfig::default());
        assert_eq!(config.storage_root(dir.path()), dir.path());
    }

    #[test]
    fn test_duplicate_pairing_rejected() {
        let yaml: Value = serde_yaml::from_str(
            "pairings:\n  - pairing_id: 'aa:aa'\n  - pairing_id: 'aa:aa'\n",
        )
        .unwrap();
        let config = ReconcilerConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn test_empty_pairing_id_rejected() {
        let yaml: Value = serde_yaml::from_str("pairings:\n  - pairing_id: ''\n").unwrap();
        assert!(matches!(
            ReconcilerConfig::from_yaml(yaml),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_base_delay_rejected() {
        let yaml: Value = serde_yaml::from_str("retry:\n  base_delay_secs: 0\n").unwrap();
        let config = ReconcilerConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_mapping_rejected() {
        let yaml: Value = serde_yaml::from_str("- one\n- two\n").unwrap();
        assert!(ReconcilerConfig::from_yaml(yaml).is_err());
    }
}
