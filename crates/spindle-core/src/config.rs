//! Node-default configuration for the balancer.

use std::path::Path;

use eyre::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_THROUGHPUT_MB: u64 = 10;
pub const DEFAULT_TOLERANCE_PERCENT: u64 = 10;
pub const DEFAULT_MAX_DISK_ERRORS: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Master gate; when false every public operation fails.
    pub enabled: bool,
    /// Node-default bandwidth ceiling in MB/s.
    pub max_disk_throughput_mb: u64,
    /// Node-default tolerance band in percent.
    pub block_tolerance_percent: u64,
    /// Node-default error budget per work item.
    pub max_disk_errors: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_disk_throughput_mb: DEFAULT_THROUGHPUT_MB,
            block_tolerance_percent: DEFAULT_TOLERANCE_PERCENT,
            max_disk_errors: DEFAULT_MAX_DISK_ERRORS,
        }
    }
}

impl BalancerConfig {
    /// Replace out-of-range values with the defaults.
    pub fn validated(mut self) -> Self {
        if self.max_disk_throughput_mb == 0 {
            self.max_disk_throughput_mb = DEFAULT_THROUGHPUT_MB;
        }
        if self.block_tolerance_percent == 0 {
            self.block_tolerance_percent = DEFAULT_TOLERANCE_PERCENT;
        }
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;

        let config: BalancerConfig =
            toml::from_str(&content).wrap_err("failed to parse config file")?;

        Ok(config.validated())
    }
}
