use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RdxError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_DETECT_PREFIX: usize = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RdxConfig {
    pub compression: CompressionConfig,
    pub store: StoreConfig,
    pub batch: BatchConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// zstd level for both streams.
    pub level: i32,
    pub chunk_size: usize,
    pub detect_prefix: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub workers: usize,
    pub bundle_archives: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub top_n: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: 3,
            chunk_size: DEFAULT_CHUNK_SIZE,
            detect_prefix: DEFAULT_DETECT_PREFIX,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            lock_timeout_ms: 5_000,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 1, bundle_archives: true }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// `$XDG_DATA_HOME/rdx/lcm.journal` or the platform equivalent, `./lcm.journal` as a last resort.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("rdx").join("lcm.journal"))
        .unwrap_or_else(|| PathBuf::from("lcm.journal"))
}

impl RdxConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s).map_err(|e| RdxError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| RdxError::io(path, e))?;
        let cfg = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.compression.chunk_size == 0 {
            return Err(RdxError::Config("compression.chunk_size must be > 0".into()));
        }
        if self.compression.detect_prefix == 0 {
            return Err(RdxError::Config("compression.detect_prefix must be > 0".into()));
        }
        if self.batch.workers == 0 {
            return Err(RdxError::Config("batch.workers must be >= 1".into()));
        }
        Ok(())
    }
}
