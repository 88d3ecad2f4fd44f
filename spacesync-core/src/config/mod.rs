//! Engine configuration
//!
//! Defaults can be overridden from a TOML file or from environment
//! variables following the pattern `SPACESYNC_<SECTION>_<KEY>`, e.g.
//! `SPACESYNC_SYNC_SCHEDULED_INTERVAL=10s`.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    FileRead(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Engine-wide settings
    pub engine: EngineSection,

    /// Synchronization defaults
    pub sync: SyncConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Root directory for per-space key material and engine state
    pub data_dir: PathBuf,
}

/// Synchronization defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval for scheduled sync mode
    #[serde(with = "humantime_serde")]
    pub scheduled_interval: Duration,

    /// Debounce applied before an auto-mode sync fires
    #[serde(with = "humantime_serde")]
    pub auto_debounce: Duration,

    /// Maximum operations retained in the in-memory log
    pub oplog_capacity: usize,

    /// Interval between liveness pings to connected peers
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".spacesync"),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scheduled_interval: Duration::from_secs(30),
            auto_debounce: Duration::from_millis(100),
            oplog_capacity: 1000,
            ping_interval: Duration::from_secs(60),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build a configuration from defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(dir) = env::var("SPACESYNC_ENGINE_DATA_DIR") {
            config.engine.data_dir = PathBuf::from(dir);
        }
        if let Ok(interval) = env::var("SPACESYNC_SYNC_SCHEDULED_INTERVAL") {
            config.sync.scheduled_interval = parse_duration(&interval)?;
        }
        if let Ok(debounce) = env::var("SPACESYNC_SYNC_AUTO_DEBOUNCE") {
            config.sync.auto_debounce = parse_duration(&debounce)?;
        }
        if let Ok(capacity) = env::var("SPACESYNC_SYNC_OPLOG_CAPACITY") {
            config.sync.oplog_capacity = capacity
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("invalid oplog capacity: {}", e)))?;
        }
        if let Ok(level) = env::var("SPACESYNC_LOGGING_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.oplog_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "oplog_capacity must be at least 1".to_string(),
            ));
        }
        if self.sync.scheduled_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "scheduled_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s)
        .map_err(|e| ConfigError::InvalidValue(format!("invalid duration '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.scheduled_interval, Duration::from_secs(30));
        assert_eq!(config.sync.oplog_capacity, 1000);
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut config = EngineConfig::default();
        config.sync.oplog_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn toml_round_trip() {
        let config = EngineConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.sync.oplog_capacity, config.sync.oplog_capacity);
        assert_eq!(parsed.engine.data_dir, config.engine.data_dir);
    }

    #[test]
    fn file_read_failure() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/spacesync.toml"));
        assert!(matches!(err, Err(ConfigError::FileRead(_))));
    }
}
