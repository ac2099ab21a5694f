use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{VeilError, VeilResult};

/// Top-level tool configuration (loaded from veilfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VeilConfig {
    pub log: LogConfig,
    pub kdf: KdfConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// scrypt cost parameters used when creating a volume or changing its password.
///
/// Existing volumes always unlock with the parameters stored in their own
/// config record; these only apply to newly wrapped keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// log2 of the scrypt cost N (default: 16, i.e. N = 65536)
    pub log_n: u8,
    /// scrypt block size (default: 8)
    pub r: u32,
    /// scrypt parallelism (default: 1)
    pub p: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident directory IVs (default: 100)
    pub dir_iv_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            log_n: 16,
            r: 8,
            p: 1,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir_iv_entries: 100,
        }
    }
}

impl VeilConfig {
    /// Load the tool configuration, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> VeilResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| VeilError::ConfigFormat(format!("parsing {}: {e}", path.display())))
    }
}
