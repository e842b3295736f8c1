//! chartdeck.toml configuration.
//!
//! Every section is optional. A missing file means all defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use chartdeck_insight::CachePolicy;
use chartdeck_vars::RuleSpec;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub secrets: SecretsConfig,
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    /// Service name → image reference.
    pub images: HashMap<String, String>,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8420,
            data_dir: PathBuf::from("/var/lib/chartdeck"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Environment variable holding the passkey.
    pub passkey_env: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            passkey_env: "CHARTDECK_PASSKEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub helm_bin: PathBuf,
    pub crane_bin: PathBuf,
    pub kubeconfig_dir: Option<PathBuf>,
    pub docker_config: Option<PathBuf>,
    /// Repository prefix for charts redeployed by a promotion.
    pub default_repository: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            helm_bin: PathBuf::from("helm"),
            crane_bin: PathBuf::from("crane"),
            kubeconfig_dir: None,
            docker_config: None,
            default_repository: "stable".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: Option<u64>,
    pub max_entries: Option<usize>,
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: self.ttl_secs.map(Duration::from_secs),
            max_entries: self.max_entries,
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
