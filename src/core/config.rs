//! Configuration management for rulescan.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rule compilation settings
    pub compiler: CompilerConfig,
    /// Scan settings
    pub scan: ScanConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("Failed to read config file: {}", e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigSave(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| Error::ConfigSave(format!("Failed to write config file: {}", e)))
    }

    /// Load configuration from the default location, falling back to defaults.
    ///
    /// Unlike [`Config::load`], a missing or broken file is not an error here.
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => return config,
                Err(e) => log::warn!("Failed to load config, using defaults: {}", e),
            }
        }

        Self::default()
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Get the application configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rulescan")
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        let ns = &self.compiler.default_namespace;
        if ns.is_empty() || ns.contains('\0') {
            return Err(Error::ConfigInvalid {
                field: "compiler.default_namespace".to_string(),
                message: "Must be a non-empty string without NUL bytes".to_string(),
            });
        }

        if self.scan.timeout_secs > i32::MAX as u64 {
            return Err(Error::ConfigInvalid {
                field: "scan.timeout_secs".to_string(),
                message: format!("Must be at most {}", i32::MAX),
            });
        }

        if self.scan.max_file_size_mb == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.max_file_size_mb".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if parse_level(&self.logging.log_level).is_none() {
            return Err(Error::ConfigInvalid {
                field: "logging.log_level".to_string(),
                message: "Must be one of trace, debug, info, warn, error".to_string(),
            });
        }

        Ok(())
    }
}

/// Rule compilation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Namespace used when none is given
    pub default_namespace: String,
    /// Treat compiler warnings as errors
    pub fail_on_warnings: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_namespace: "default".to_string(),
            fail_on_warnings: false,
        }
    }
}

/// Scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Stop matching a string after its first hit
    pub fast_mode: bool,
    /// Per-scan timeout in seconds (0 = none)
    pub timeout_secs: u64,
    /// Follow symbolic links when walking directories
    pub follow_symlinks: bool,
    /// Skip files larger than this size (MB) when walking directories
    pub max_file_size_mb: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            fast_mode: false,
            timeout_secs: 0,
            follow_symlinks: false,
            max_file_size_mb: 100,
        }
    }
}

impl ScanConfig {
    /// Timeout as a duration, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Size limit in bytes.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Parse a textual log level.
pub fn parse_level(level: &str) -> Option<log::LevelFilter> {
    match level.to_lowercase().as_str() {
        "trace" => Some(log::LevelFilter::Trace),
        "debug" => Some(log::LevelFilter::Debug),
        "info" => Some(log::LevelFilter::Info),
        "warn" | "warning" => Some(log::LevelFilter::Warn),
        "error" => Some(log::LevelFilter::Error),
        "off" => Some(log::LevelFilter::Off),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.compiler.default_namespace, "default");
        assert!(config.scan.timeout().is_none());
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.scan.timeout_secs = 5;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.scan.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"scan": {"fast_mode": true}}"#).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(loaded.scan.fast_mode);
        assert_eq!(loaded.scan.max_file_size_mb, 100);
        assert_eq!(loaded.logging.log_level, "info");
    }

    #[test]
    fn test_invalid_config() {
        let mut config = Config::default();
        config.compiler.default_namespace = String::new();
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid { .. })));

        let mut config = Config::default();
        config.logging.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scan.timeout_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::ConfigLoad(_)));
    }
}
