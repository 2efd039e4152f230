//! asyncdomain configuration
//!
//! Engine settings read from a TOML file. Every section and key is optional;
//! missing values fall back to the defaults below.
//!
//! ```toml
//! [event_loop]
//! max_turns = 10000
//! timer_resolution_ms = 1
//!
//! [router]
//! install_on_start = true
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! # Usage
//!
//! ```rust
//! use asyncdomain::util::config::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str("[logging]\nlevel = \"warn\"").unwrap();
//! assert!(config.router.install_on_start);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::runtime::scheduler::LoopConfig;
use crate::util::logger::LogLevel;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Event loop settings
    #[serde(default)]
    pub event_loop: LoopConfig,
    /// Error router settings
    #[serde(default)]
    pub router: RouterConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Error router configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Install the global error router when the engine starts
    #[serde(default = "default_install_on_start")]
    pub install_on_start: bool,
}

fn default_install_on_start() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            install_on_start: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level name (`trace`, `debug`, `info`, `warn`, `error`)
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl LoggingConfig {
    /// Parsed log level.
    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        self.level.parse().map_err(ConfigError::InvalidLevel)
    }
}

impl EngineConfig {
    /// Parse a TOML document. The log level is validated.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.logging.log_level()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Load configuration from `path`.
/// Returns default config if the file doesn't exist
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(path)?;
    EngineConfig::from_toml_str(&content)
}

/// Save configuration to `path`
pub fn save_config(
    config: &EngineConfig,
    path: impl AsRef<Path>,
) -> Result<(), ConfigError> {
    fs::write(path, config.to_toml_string()?)?;
    Ok(())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Unknown log level: {0}")]
    InvalidLevel(String),
}
