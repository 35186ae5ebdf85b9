// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engine Configuration Types
//
// Defines the configuration schema for a netpolicy node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Storage backend for policy state
// - Netsys acquisition retry settings
// - Quota evaluation cadence and observer limits
// - Static interface table for the built-in network center
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::quota::NetBearType;
use crate::domain::repository::StorageBackend;

pub const API_VERSION: &str = "netpolicy/v1";
pub const KIND: &str = "NetPolicyConfig";
pub const CONFIG_PATH_ENV: &str = "NETPOLICY_CONFIG_PATH";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetPolicyConfigManifest {
    /// API version (must be "netpolicy/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NetPolicyConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: NetPolicyConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Content under spec:
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetPolicyConfigSpec {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub netsys: NetsysConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub observers: ObserverConfig,

    /// Interfaces known to the static network center
    #[serde(default)]
    pub interfaces: Vec<InterfaceBinding>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Memory,
    JsonFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_kind")]
    pub backend: StorageKind,

    /// Policy document path (required for json_file)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn backend(&self) -> StorageBackend {
        match (&self.backend, &self.path) {
            (StorageKind::JsonFile, Some(path)) => StorageBackend::JsonFile { path: path.clone() },
            _ => StorageBackend::InMemory,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetsysConfig {
    /// Attempts made to acquire the netsys handle at startup
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Seconds between periodic quota update passes
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default = "default_max_observers")]
    pub max_registered: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceBinding {
    pub net_type: NetBearType,

    /// SIM iccid for cellular, interface ident otherwise
    #[serde(default)]
    pub identity: String,

    pub interface: String,

    /// Static byte counter reported for the interface
    #[serde(default)]
    pub usage_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen_address: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Memory
}

fn default_connect_retries() -> u32 {
    10
}

fn default_retry_interval_ms() -> u64 {
    500
}

fn default_evaluation_interval() -> u64 {
    60
}

fn default_max_observers() -> usize {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9464".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_kind(),
            path: None,
        }
    }
}

impl Default for NetsysConfig {
    fn default() -> Self {
        Self {
            connect_retries: default_connect_retries(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: default_evaluation_interval(),
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            max_registered: default_max_observers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: default_metrics_listen(),
        }
    }
}

impl Default for NetPolicyConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "netpolicy-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: NetPolicyConfigSpec::default(),
        }
    }
}

impl NetPolicyConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Candidate locations, in precedence order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./netpolicy-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".netpolicy").join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/netpolicy/config.yaml"));
        paths
    }

    /// Discover configuration file using precedence order
    /// 1. NETPOLICY_CONFIG_PATH environment variable
    /// 2. ./netpolicy-config.yaml (working directory)
    /// 3. ~/.netpolicy/config.yaml (user home)
    /// 4. /etc/netpolicy/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("NETPOLICY_LOG_LEVEL") {
            tracing::info!("Environment override: NETPOLICY_LOG_LEVEL={}", level);
            self.spec.logging.level = level;
        }

        if let Ok(path) = std::env::var("NETPOLICY_STORAGE_PATH") {
            tracing::info!("Environment override: NETPOLICY_STORAGE_PATH={}", path);
            self.spec.storage.backend = StorageKind::JsonFile;
            self.spec.storage.path = Some(PathBuf::from(path));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.storage.backend == StorageKind::JsonFile && self.spec.storage.path.is_none() {
            anyhow::bail!("spec.storage.path is required for the json_file backend");
        }

        if self.spec.netsys.connect_retries == 0 {
            anyhow::bail!("spec.netsys.connect_retries must be at least 1");
        }

        if self.spec.netsys.retry_interval_ms == 0 {
            anyhow::bail!("spec.netsys.retry_interval_ms must be greater than 0");
        }

        if self.spec.quota.evaluation_interval_secs == 0 {
            anyhow::bail!("spec.quota.evaluation_interval_secs must be greater than 0");
        }

        if self.spec.observers.max_registered == 0 {
            anyhow::bail!("spec.observers.max_registered must be greater than 0");
        }

        for binding in &self.spec.interfaces {
            if binding.interface.is_empty() {
                anyhow::bail!("Interface name cannot be empty for {} '{}'", binding.net_type, binding.identity);
            }
        }

        if let Some(metrics) = &self.spec.metrics {
            if metrics.enabled && metrics.listen_address.parse::<std::net::SocketAddr>().is_err() {
                anyhow::bail!("Invalid metrics listen_address: '{}'", metrics.listen_address);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NetPolicyConfigManifest::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.spec.netsys.connect_retries, 10);
        assert_eq!(config.spec.netsys.retry_interval_ms, 500);
        assert_eq!(config.spec.observers.max_registered, 200);
        assert_eq!(config.spec.storage.backend(), StorageBackend::InMemory);
    }

    #[test]
    fn test_parse_manifest() {
        let yaml = r#"
apiVersion: netpolicy/v1
kind: NetPolicyConfig
metadata:
  name: handset-01
spec:
  storage:
    backend: json_file
    path: /var/lib/netpolicy/policy.json
  quota:
    evaluation_interval_secs: 30
  interfaces:
    - net_type: 0
      identity: "8986"
      interface: rmnet0
    - net_type: 1
      identity: home
      interface: wlan0
"#;
        let config = NetPolicyConfigManifest::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.metadata.name, "handset-01");
        assert_eq!(config.spec.quota.evaluation_interval_secs, 30);
        assert_eq!(config.spec.netsys.connect_retries, 10);
        assert_eq!(config.spec.interfaces.len(), 2);
        assert_eq!(config.spec.interfaces[0].net_type, NetBearType::Cellular);
        assert_eq!(
            config.spec.storage.backend(),
            StorageBackend::JsonFile {
                path: PathBuf::from("/var/lib/netpolicy/policy.json")
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_manifest() {
        let mut config = NetPolicyConfigManifest::default();
        config.kind = "NodeConfig".to_string();
        assert!(config.validate().is_err());

        let mut config = NetPolicyConfigManifest::default();
        config.spec.storage.backend = StorageKind::JsonFile;
        assert!(config.validate().is_err());

        let mut config = NetPolicyConfigManifest::default();
        config.spec.netsys.connect_retries = 0;
        assert!(config.validate().is_err());

        let mut config = NetPolicyConfigManifest::default();
        config.spec.metrics = Some(MetricsConfig {
            enabled: true,
            listen_address: "not-an-address".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netpolicy-config.yaml");
        let config = NetPolicyConfigManifest::default();
        config.to_yaml_file(&path).unwrap();
        let loaded = NetPolicyConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.kind, KIND);
        assert_eq!(loaded.metadata.name, config.metadata.name);
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let result = NetPolicyConfigManifest::load_or_default(Some(PathBuf::from("/nonexistent/netpolicy.yaml")));
        assert!(result.is_err());
    }
}
