//! Logging setup for rulescan.

use crate::core::config::{parse_level, Config};
use crate::core::error::{Error, Result};
use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log level
    pub level: LevelFilter,
    /// Show timestamps
    pub timestamps: bool,
    /// Show module path
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            timestamps: true,
            module_path: false,
        }
    }
}

impl LogConfig {
    /// Create a log config from application config. Unknown levels fall back
    /// to `info`.
    pub fn from_config(config: &Config) -> Self {
        let level = parse_level(&config.logging.log_level).unwrap_or(LevelFilter::Info);
        Self {
            level,
            timestamps: true,
            module_path: level >= LevelFilter::Debug,
        }
    }

    /// Create a verbose log config for CLI.
    pub fn verbose() -> Self {
        Self {
            level: LevelFilter::Debug,
            timestamps: true,
            module_path: true,
        }
    }

    /// Create a quiet log config (errors only).
    pub fn quiet() -> Self {
        Self {
            level: LevelFilter::Error,
            timestamps: false,
            module_path: false,
        }
    }
}

fn level_label(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1b[31mERROR\x1b[0m",
        log::Level::Warn => "\x1b[33mWARN\x1b[0m ",
        log::Level::Info => "\x1b[32mINFO\x1b[0m ",
        log::Level::Debug => "\x1b[34mDEBUG\x1b[0m",
        log::Level::Trace => "\x1b[35mTRACE\x1b[0m",
    }
}

/// Initialize the global logger. Logs go to stderr so scan output on stdout
/// stays machine-readable.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(config.level);
    builder.target(env_logger::Target::Stderr);

    let LogConfig {
        timestamps,
        module_path,
        ..
    } = config;
    builder.format(move |buf, record| {
        if timestamps {
            write!(buf, "{} ", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        }
        write!(buf, "[{}] ", level_label(record.level()))?;
        if module_path {
            if let Some(path) = record.module_path() {
                write!(buf, "{}: ", path)?;
            }
        }
        writeln!(buf, "{}", record.args())
    });

    builder
        .try_init()
        .map_err(|e| Error::ConfigLoad(format!("Failed to initialize logging: {}", e)))?;

    log::debug!("Logging initialized with level: {:?}", config.level);
    Ok(())
}
