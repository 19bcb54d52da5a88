/*
* Configuration
* -------------
* @project: cluster-lifecycle-manager
*
* Layers, lowest priority first:
*
*   1. hardcoded defaults (the numbers the workflows were tuned with)
*   2. {CONFIG_PATH}/default.(json|toml|yaml)
*   3. {CONFIG_PATH}/local.*, optional, for the box you're on
*   4. env vars: CLM_REBALANCE__DRY_RUN=false and friends
*
* CONFIG_PATH defaults to ./config. `init` writes the defaults out as
* default.json so there's something to edit.
*
* Nothing in here is secret. Credentials come from the caller, per call.
*/

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::health::HealthWeights;
use crate::core::preflight::LARGE_DISK_THRESHOLD_GB;

pub const ENV_PREFIX: &str = "CLM";
pub const DEFAULT_CONFIG_DIR: &str = "config";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub preflight: PreflightSettings,
    pub health: HealthSettings,
    pub rebalance: RebalanceSettings,
    pub polling: PollingSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightSettings {
    /// Online migrations above this total disk size need an explicit ack.
    pub large_disk_threshold_gb: f64,
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            large_disk_threshold_gb: LARGE_DISK_THRESHOLD_GB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub cpu_weight: f64,
    pub mem_weight: f64,
    pub storage_weight: f64,
    pub offline_weight: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        let weights = HealthWeights::default();
        Self {
            cpu_weight: weights.cpu,
            mem_weight: weights.mem,
            storage_weight: weights.storage,
            offline_weight: weights.offline,
        }
    }
}

impl HealthSettings {
    pub fn weights(&self) -> HealthWeights {
        HealthWeights {
            cpu: self.cpu_weight,
            mem: self.mem_weight,
            storage: self.storage_weight,
            offline: self.offline_weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceSettings {
    /// Score spread (points) that counts as unbalanced.
    pub threshold: f64,
    pub dry_run: bool,
    pub target_storage: Option<String>,
    pub target_bridge: String,
    pub include_containers: bool,
}

impl Default for RebalanceSettings {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            dry_run: true,
            target_storage: None,
            target_bridge: "vmbr0".to_string(),
            include_containers: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Replication jobs and migration history live here.
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// EnvFilter directive used when RUST_LOG is not set.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Directory holding `default` and `local`: `$CONFIG_PATH` or `config`.
pub fn config_dir() -> PathBuf {
    config_dir_from(std::env::var("CONFIG_PATH").ok())
}

fn config_dir_from(var: Option<String>) -> PathBuf {
    match var {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_CONFIG_DIR),
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = config_dir();

        info!("Loading configuration from path: {}", config_path.display());

        let config = with_defaults(Config::builder())?
            .add_source(File::with_name(&format!("{}/default", config_path.display())))
            .add_source(File::with_name(&format!("{}/local", config_path.display())).required(false))
            .add_source(environment())
            .build()?;

        config.try_deserialize()
    }

    /// One explicit file over the defaults (still overridable from env).
    pub fn new_from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from file: {}", path.display());

        let config = with_defaults(Config::builder())?
            .add_source(File::from(path))
            .add_source(environment())
            .build()?;

        config.try_deserialize()
    }

    pub fn health_weights(&self) -> HealthWeights {
        self.health.weights()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    let defaults = Settings::default();
    builder
        .set_default(
            "preflight.large_disk_threshold_gb",
            defaults.preflight.large_disk_threshold_gb,
        )?
        .set_default("health.cpu_weight", defaults.health.cpu_weight)?
        .set_default("health.mem_weight", defaults.health.mem_weight)?
        .set_default("health.storage_weight", defaults.health.storage_weight)?
        .set_default("health.offline_weight", defaults.health.offline_weight)?
        .set_default("rebalance.threshold", defaults.rebalance.threshold)?
        .set_default("rebalance.dry_run", defaults.rebalance.dry_run)?
        .set_default("rebalance.target_bridge", defaults.rebalance.target_bridge)?
        .set_default(
            "rebalance.include_containers",
            defaults.rebalance.include_containers,
        )?
        .set_default("polling.interval_secs", defaults.polling.interval_secs)?
        .set_default(
            "storage.data_dir",
            defaults.storage.data_dir.to_string_lossy().into_owned(),
        )?
        .set_default("logging.level", defaults.logging.level)
}

/// What `init` writes to disk.
pub fn generate_default_config() -> Settings {
    Settings::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_dir_follows_config_path() {
        assert_eq!(config_dir_from(Some("/etc/clm".into())), PathBuf::from("/etc/clm"));
        assert_eq!(config_dir_from(Some(String::new())), PathBuf::from(DEFAULT_CONFIG_DIR));
        assert_eq!(config_dir_from(None), PathBuf::from(DEFAULT_CONFIG_DIR));
    }

    #[test]
    fn defaults_match_tuned_values() {
        let settings = Settings::default();
        assert_eq!(settings.preflight.large_disk_threshold_gb, 100.0);
        assert_eq!(settings.health_weights(), HealthWeights::default());
        assert_eq!(settings.rebalance.threshold, 30.0);
        assert!(settings.rebalance.dry_run);
        assert_eq!(settings.rebalance.target_bridge, "vmbr0");
        assert_eq!(settings.polling.interval_secs, 30);
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "rebalance": {{ "dry_run": false, "target_storage": "ceph" }}, "polling": {{ "interval_secs": 10 }} }}"#
        )
        .unwrap();

        let settings = Settings::new_from_file(file.path()).unwrap();
        assert!(!settings.rebalance.dry_run);
        assert_eq!(settings.rebalance.target_storage.as_deref(), Some("ceph"));
        assert_eq!(settings.rebalance.target_bridge, "vmbr0");
        assert_eq!(settings.polling.interval_secs, 10);
        assert_eq!(settings.health.cpu_weight, 0.3);
    }
}
