//! Engine configuration
//!
//! Defaults, then an optional TOML file, then `TIMESCAPE_*` environment
//! overrides, then validation.
//!
//! ```toml
//! max_hops = 10
//! hop_timeout_ms = 5000
//! cold_threshold_ms = 86400000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var overriding [`EngineConfig::max_hops`]
pub const ENV_MAX_HOPS: &str = "TIMESCAPE_MAX_HOPS";
/// Env var overriding [`EngineConfig::hop_timeout_ms`]
pub const ENV_HOP_TIMEOUT_MS: &str = "TIMESCAPE_HOP_TIMEOUT_MS";
/// Env var overriding [`EngineConfig::cold_threshold_ms`]
pub const ENV_COLD_THRESHOLD_MS: &str = "TIMESCAPE_COLD_THRESHOLD_MS";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML did not match the schema
    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment override is not a number
    #[error("{var}={value} is not a valid unsigned integer")]
    Env { var: &'static str, value: String },

    /// Values out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Longest chain the planner accepts
    pub max_hops: usize,
    /// Per-hop transform timeout in milliseconds
    pub hop_timeout_ms: u64,
    /// Traffic-drain threshold handed to the external monitor; not enforced here
    pub cold_threshold_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hops: 10,
            hop_timeout_ms: 5_000,
            cold_threshold_ms: 24 * 60 * 60 * 1_000,
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With max hops
    #[inline]
    #[must_use]
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// With per-hop timeout
    #[inline]
    #[must_use]
    pub fn with_hop_timeout(mut self, timeout: Duration) -> Self {
        self.hop_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With cold threshold
    #[inline]
    #[must_use]
    pub fn with_cold_threshold(mut self, threshold: Duration) -> Self {
        self.cold_threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    #[must_use]
    pub fn hop_timeout(&self) -> Duration {
        Duration::from_millis(self.hop_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn cold_threshold(&self) -> Duration {
        Duration::from_millis(self.cold_threshold_ms)
    }

    /// Parse and validate TOML; missing keys keep their defaults
    ///
    /// # Errors
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`]
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, apply environment overrides and validate
    ///
    /// # Errors
    /// Any [`ConfigError`]
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        let config = config.with_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    ///
    /// # Errors
    /// [`ConfigError::Env`] or [`ConfigError::Invalid`]
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TIMESCAPE_*` overrides resolved through `lookup`
    ///
    /// # Errors
    /// [`ConfigError::Env`] for a non-numeric value
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = read_override(&lookup, ENV_MAX_HOPS)? {
            self.max_hops = usize::try_from(v).unwrap_or(usize::MAX);
        }
        if let Some(v) = read_override(&lookup, ENV_HOP_TIMEOUT_MS)? {
            self.hop_timeout_ms = v;
        }
        if let Some(v) = read_override(&lookup, ENV_COLD_THRESHOLD_MS)? {
            self.cold_threshold_ms = v;
        }
        Ok(self)
    }

    /// Check ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] when `max_hops` or `hop_timeout_ms` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_hops == 0 {
            return Err(ConfigError::Invalid("max_hops must be at least 1".to_string()));
        }
        if self.hop_timeout_ms == 0 {
            return Err(ConfigError::Invalid("hop_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

fn read_override<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
