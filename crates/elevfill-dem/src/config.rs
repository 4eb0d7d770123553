//! DEM configuration loaded from YAML.
//!
//! Every field is optional; an empty document yields the defaults:
//!
//! ```yaml
//! root: ~/gps/dem
//! base_url: https://prd-tnm.s3.amazonaws.com/StagedProducts/Elevation/13/IMG
//! request_timeout_secs: 300
//! cache_capacity: 8
//! on_collision: fail
//! retry:
//!   max_attempts: 3
//!   initial_backoff_ms: 500
//!   max_backoff_ms: 8000
//!   multiplier: 2.0
//! ```

use crate::acquire::CollisionPolicy;
use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::remote::DEFAULT_BASE_URL;
use crate::retry::RetryPolicy;
use crate::{DemError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default per-request timeout. Archives run to several hundred megabytes.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Settings for locating, acquiring and caching tiles.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemConfig {
    /// Directory holding archives and extracted rasters.
    pub root: PathBuf,
    /// Remote store location; `{base_url}/{name}.zip` is fetched.
    pub base_url: String,
    /// Upper bound for one HTTP request, body included.
    pub request_timeout_secs: u64,
    /// Maximum number of open datasets.
    pub cache_capacity: usize,
    /// Handling of a pre-existing, incomplete extraction directory.
    pub on_collision: CollisionPolicy,
    /// Retry behaviour for transient failures.
    pub retry: RetryConfig,
}

impl Default for DemConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            on_collision: CollisionPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// YAML form of [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

impl DemConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty map.
        let config: DemConfig = if yaml.trim().is_empty() {
            DemConfig::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| DemError::ConfigParse(Arc::new(e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| DemError::ConfigRead {
            path: path.to_path_buf(),
            source: Arc::new(e),
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(DemError::InvalidConfig("root must not be empty".into()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(DemError::InvalidConfig(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(DemError::InvalidConfig(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(DemError::InvalidConfig("cache_capacity must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(DemError::InvalidConfig("retry.max_attempts must be at least 1".into()));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(DemError::InvalidConfig(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(DemError::InvalidConfig(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            multiplier: self.retry.multiplier,
        }
    }
}

/// `$HOME/gps/dem`, or `gps/dem` relative to the working directory when
/// `HOME` is unset.
pub fn default_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join("gps")
        .join("dem")
}
