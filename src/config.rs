//! Configuration for the fabsync daemon.

use std::path::Path;

use fabsync_core::{Error, Result};
use fabsync_reconciler::{LoopConfig, ReconcilerConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// File read when no configuration path is given.
pub const DEFAULT_CONFIG_FILE: &str = "fabsync.toml";

/// Top-level configuration, one table per component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Retry limits, backoff and concurrency of a reconciliation pass.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Pass scheduling.
    #[serde(default, rename = "loop")]
    pub sync: LoopConfig,

    /// Log filtering.
    #[serde(default)]
    pub log: LogConfig,
}

/// Log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load and validate the configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// read if present and defaults are used otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => fabsync_core::fs::read_toml(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                fabsync_core::fs::read_toml(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("No configuration file, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the section of the first
    /// invalid value.
    pub fn validate(&self) -> Result<()> {
        section("reconciler", self.reconciler.validate())?;
        section("loop", self.sync.validate())?;
        if self.log.filter.trim().is_empty() {
            return Err(Error::invalid_config("[log] filter must not be empty"));
        }
        Ok(())
    }
}

fn section(name: &str, result: fabsync_reconciler::Result<()>) -> Result<()> {
    result.map_err(|e| match e {
        fabsync_reconciler::Error::InvalidConfig { reason } => {
            Error::invalid_config(format!("[{name}] {reason}"))
        }
        other => Error::invalid_config(format!("[{name}] {other}")),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.reconciler.max_create_retry, 5);
        assert_eq!(config.reconciler.max_concurrent_roots, 8);
        assert_eq!(config.sync.idle_interval, Duration::from_secs(1));
        assert_eq!(config.log.filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml_from("[reconciler]\nmax_create_retry = 2\n");
        assert_eq!(config.reconciler.max_create_retry, 2);
        assert_eq!(config.reconciler.failed_retry_margin, 5);
        assert_eq!(config.sync, LoopConfig::default());
    }

    #[test]
    fn test_loop_table_uses_millis() {
        let config: AppConfig =
            toml_from("[loop]\nbusy_interval_ms = 250\nidle_interval_ms = 5000\n");
        assert_eq!(config.sync.busy_interval, Duration::from_millis(250));
        assert_eq!(config.sync.idle_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_names_section() {
        let mut config = AppConfig::default();
        config.reconciler.max_create_retry = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[reconciler] max_create_retry"));
    }

    #[test]
    fn test_validate_rejects_empty_filter() {
        let mut config = AppConfig::default();
        config.log.filter = "  ".to_string();
        assert!(config.validate().is_err());
    }

    fn toml_from(text: &str) -> AppConfig {
        toml::from_str(text).unwrap()
    }
}
