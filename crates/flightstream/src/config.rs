//! Configuration management for flightstream.
//!
//! Configuration is loaded with figment from defaults, an optional TOML file
//! and `FLIGHTSTREAM_` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "flightstream";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "flightlogs.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "FLIGHTSTREAM_";

/// Default stream endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8765";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FLIGHTSTREAM_`, sections nested
///    with `__`, e.g. `FLIGHTSTREAM_STREAM__ENDPOINT`)
/// 2. TOML config file at `~/.config/flightstream/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Live stream configuration.
    pub stream: StreamConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Replay configuration.
    pub replay: ReplayConfig,
}

/// Live stream configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// WebSocket endpoint of the telemetry source.
    pub endpoint: String,
    /// Delay before reconnecting after a close, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Number of recent samples kept for display.
    pub buffer_capacity: usize,
    /// Start with listening paused.
    pub start_paused: bool,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/flightstream/flightlogs.db`
    pub database_path: Option<PathBuf>,
}

/// Replay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Interval between replayed frames in milliseconds.
    pub frame_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect_delay_ms: 3000,
            buffer_capacity: 100,
            start_paused: false,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 100,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        let config: Config = Self::figment(&config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        let endpoint = &self.stream.endpoint;
        let host = endpoint.strip_prefix("ws://").unwrap_or_default();
        if host.is_empty() {
            return Err(Error::ConfigValidation {
                message: format!("stream.endpoint must be a ws:// URL, got {endpoint:?}"),
            });
        }

        if self.stream.reconnect_delay_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "stream.reconnect_delay_ms must be greater than 0".to_string(),
            });
        }

        if self.stream.buffer_capacity == 0 {
            return Err(Error::ConfigValidation {
                message: "stream.buffer_capacity must be greater than 0".to_string(),
            });
        }

        if self.replay.frame_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "replay.frame_interval_ms must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the reconnect delay as a Duration.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.stream.reconnect_delay_ms)
    }

    /// Get the replay frame interval as a Duration.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.replay.frame_interval_ms)
    }
}
