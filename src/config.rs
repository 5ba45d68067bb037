//! Acceleration configuration.
//!
//! `AccelConfig` holds the process-wide tunables that control how the surface managers cache
//! images in accelerated memory. The values are read once, normally from the environment at
//! startup, and never change afterwards. Managers receive the config through a
//! [`SurfaceContext`](crate::context::SurfaceContext) instead of reading globals.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use surfcache::config::AccelConfig;
//! let cfg = AccelConfig::default();
//! assert_eq!(cfg.threshold, 1);
//! assert!(cfg.acceleration_enabled);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use surfcache::config::AccelConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = AccelConfig::builder()
//!     .threshold(4)
//!     .allow_raster_steal(true)
//!     .build()?;
//! # Ok(()) }
//! ```
//!
//! # Environment
//!
//! - `SURFCACHE_MANAGED_IMAGES`: `false` disables acceleration for every image.
//! - `SURFCACHE_ACCEL_THRESHOLD`: number of copies from system memory before an image is promoted.
//! - `SURFCACHE_ALLOW_RASTER_STEAL`: `true` keeps acceleration on after direct pixel access.

use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const ENV_MANAGED_IMAGES: &str = "SURFCACHE_MANAGED_IMAGES";
pub const ENV_ACCEL_THRESHOLD: &str = "SURFCACHE_ACCEL_THRESHOLD";
pub const ENV_ALLOW_RASTER_STEAL: &str = "SURFCACHE_ALLOW_RASTER_STEAL";

const DEFAULT_SCRATCH_BUDGET: usize = 16 * 1024 * 1024;

lazy_static! {
    static ref PROCESS_CONFIG: Arc<AccelConfig> = Arc::new(AccelConfig::from_env());
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelConfig {
    /// Global switch. When off, no image is ever cached in accelerated memory.
    pub acceleration_enabled: bool,
    /// Copies from the software surface that must happen before the first promotion.
    pub threshold: u32,
    /// Keep acceleration enabled after a caller took direct access to the raster.
    pub allow_raster_steal: bool,
    /// Upper bound for intermediate surfaces retained by the scratch pool.
    pub scratch_budget_bytes: usize,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            acceleration_enabled: true,
            threshold: 1,
            allow_raster_steal: false,
            scratch_budget_bytes: DEFAULT_SCRATCH_BUDGET,
        }
    }
}

impl AccelConfig {
    pub fn builder() -> AccelConfigBuilder {
        AccelConfigBuilder::default()
    }

    /// The configuration of this process, read from the environment on first use.
    pub fn process() -> Arc<AccelConfig> {
        PROCESS_CONFIG.clone()
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`. Values that cannot be used are ignored and the
    /// default is kept.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = AccelConfig::default();

        if lookup(ENV_MANAGED_IMAGES).as_deref() == Some("false") {
            cfg.acceleration_enabled = false;
            log::info!("Disabling managed images");
        }

        if let Some(raw) = lookup(ENV_ACCEL_THRESHOLD) {
            match parse_threshold(&raw) {
                Ok(threshold) => {
                    cfg.threshold = threshold;
                    log::info!("New acceleration threshold: {}", threshold);
                }
                Err(e) => log::warn!("Error setting new threshold: {}", e),
            }
        }

        if lookup(ENV_ALLOW_RASTER_STEAL).as_deref() == Some("true") {
            cfg.allow_raster_steal = true;
            log::info!("Raster steal allowed");
        }

        cfg
    }

    /// Parses and validates a JSON document. Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: AccelConfig = serde_json::from_str(json)?;
        validate(&cfg)?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

fn parse_threshold(raw: &str) -> Result<u32, ConfigError> {
    let parsed: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidThreshold(raw.to_string()))?;
    u32::try_from(parsed).map_err(|_| ConfigError::InvalidThreshold(raw.to_string()))
}

/// Builder for [`AccelConfig`], mirroring the other config builders.
#[derive(Debug, Clone, Default)]
pub struct AccelConfigBuilder {
    inner: AccelConfig,
}

impl AccelConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut AccelConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn acceleration_enabled(self, on: bool) -> Self { self.map(|c| c.acceleration_enabled = on) }
    pub fn threshold(self, copies: u32) -> Self { self.map(|c| c.threshold = copies) }
    pub fn allow_raster_steal(self, on: bool) -> Self { self.map(|c| c.allow_raster_steal = on) }
    pub fn scratch_budget_bytes(self, bytes: usize) -> Self { self.map(|c| c.scratch_budget_bytes = bytes) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut AccelConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<AccelConfig, ConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

fn validate(c: &AccelConfig) -> Result<(), ConfigError> {
    if c.scratch_budget_bytes == 0 {
        return Err(ConfigError::ZeroScratchBudget);
    }
    Ok(())
}
