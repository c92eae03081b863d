use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::remote::RemoteConfig;
use crate::sandbox::ttl::DEFAULT_CLEANUP_INTERVAL_SECS;

const CONFIG_FILE: &str = "cubby.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub local: LocalConfig,
    /// Present when operating against the remote service.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

/// Local backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory under which sandbox roots are created.
    /// Defaults to a `cubby/sandboxes` directory in the user cache dir.
    #[serde(default)]
    pub root_dir: Option<PathBuf>,

    /// Seconds between background prune passes.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// TTL applied to sandboxes created without one. None never expires.
    #[serde(default)]
    pub default_ttl_seconds: Option<f64>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            cleanup_interval_secs: default_cleanup_interval(),
            default_ttl_seconds: None,
        }
    }
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}

impl LocalConfig {
    /// The configured root dir, or the platform default.
    pub fn effective_root_dir(&self) -> PathBuf {
        self.root_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("cubby")
                .join("sandboxes")
        })
    }
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}
