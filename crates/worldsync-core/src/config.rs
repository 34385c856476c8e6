//! Configuration loading and typed config structures for WorldSync.
//!
//! The configuration lives in `worldsync.yaml` next to the binary's working
//! directory. Every field has a default, so an absent file or an empty
//! section is valid.
//!
//! ```yaml
//! server:
//!   host: "0.0.0.0"
//!   port: 8000
//!   static_dir: "static"
//! logging:
//!   level: "info"
//!   format: "pretty"   # or "json"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override held a value of the wrong shape.
    #[error("invalid value {value:?} for {key}")]
    InvalidOverride {
        /// The environment variable name.
        key: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration. Mirrors the structure of `worldsync.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WorldSyncConfig {
    /// Listener address and static assets.
    #[serde(default)]
    pub server: ServerSection,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WorldSyncConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::InvalidOverride`] if an override is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for when no file exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`:
    /// - `WORLDSYNC_HOST` overrides `server.host`
    /// - `WORLDSYNC_PORT` overrides `server.port`
    /// - `WORLDSYNC_STATIC_DIR` overrides `server.static_dir`
    /// - `WORLDSYNC_LOG_FORMAT` overrides `logging.format`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(val) = lookup("WORLDSYNC_HOST") {
            self.server.host = val;
        }
        if let Some(val) = lookup("WORLDSYNC_PORT") {
            let Ok(port) = val.parse() else {
                return Err(ConfigError::InvalidOverride {
                    key: "WORLDSYNC_PORT",
                    value: val,
                });
            };
            self.server.port = port;
        }
        if let Some(val) = lookup("WORLDSYNC_STATIC_DIR") {
            self.server.static_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("WORLDSYNC_LOG_FORMAT") {
            self.logging.format = match val.as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidOverride {
                        key: "WORLDSYNC_LOG_FORMAT",
                        value: val,
                    });
                }
            };
        }
        Ok(())
    }
}

/// Server listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// The host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// The TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served under `/static`.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (trace, debug,
    /// info, warn, error, or a full `EnvFilter` directive).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_log_level() -> String {
    String::from("info")
}
