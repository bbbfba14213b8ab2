//! Configuration file.
//!
//! Settings live in an INI file at `~/.hubsync/config.ini`:
//!
//! ```ini
//! [channel]
//! endpoint = ws://127.0.0.1:8188/ws/downloads
//! connect_timeout_secs = 10
//!
//! [downloads]
//! ; 0 keeps finished downloads until they are dismissed
//! auto_purge_secs = 0
//!
//! [logging]
//! directory = /home/user/.hubsync/logs
//! level = info
//! ```
//!
//! Missing files, sections and keys fall back to defaults. Values that are
//! present but invalid are reported as errors rather than silently replaced.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::download::CoordinatorConfig;

/// Default progress channel endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8188/ws/downloads";

/// Default channel connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const CONFIG_DIR_NAME: &str = ".hubsync";
const CONFIG_FILE_NAME: &str = "config.ini";
const LOG_DIR_NAME: &str = "logs";

/// Errors reading, writing or editing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// `[channel]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// WebSocket endpoint of the download server.
    pub endpoint: String,
    pub connect_timeout_secs: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// `[downloads]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Seconds after which finished downloads are dropped. 0 disables.
    pub auto_purge_secs: u64,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: config_dir().join(LOG_DIR_NAME),
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub channel: ChannelSettings,
    pub downloads: DownloadSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(source) => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
            ini::Error::Parse(e) => ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;

        let mut config = Self::default();
        for key in ConfigKey::all() {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                key.set(&mut config, value.trim())?;
            }
        }
        Ok(config)
    }

    /// Save to the default location, creating `~/.hubsync` if needed.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }
        ini.write_to_file(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Coordinator settings derived from this file.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let auto_purge = match self.downloads.auto_purge_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        CoordinatorConfig::default()
            .with_connect_timeout(Duration::from_secs(self.channel.connect_timeout_secs))
            .with_auto_purge_after(auto_purge)
    }
}

/// `~/.hubsync`, or `./.hubsync` when the home directory is unknown.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// A settable configuration key, written `section.key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ChannelEndpoint,
    ChannelConnectTimeoutSecs,
    DownloadsAutoPurgeSecs,
    LoggingDirectory,
    LoggingLevel,
}

impl ConfigKey {
    /// Every key, in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::ChannelEndpoint,
            ConfigKey::ChannelConnectTimeoutSecs,
            ConfigKey::DownloadsAutoPurgeSecs,
            ConfigKey::LoggingDirectory,
            ConfigKey::LoggingLevel,
        ]
    }

    /// Full `section.key` name.
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::ChannelEndpoint => "channel.endpoint",
            ConfigKey::ChannelConnectTimeoutSecs => "channel.connect_timeout_secs",
            ConfigKey::DownloadsAutoPurgeSecs => "downloads.auto_purge_secs",
            ConfigKey::LoggingDirectory => "logging.directory",
            ConfigKey::LoggingLevel => "logging.level",
        }
    }

    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::ChannelEndpoint | ConfigKey::ChannelConnectTimeoutSecs => "channel",
            ConfigKey::DownloadsAutoPurgeSecs => "downloads",
            ConfigKey::LoggingDirectory | ConfigKey::LoggingLevel => "logging",
        }
    }

    /// Key name within its section.
    pub fn key_name(&self) -> &'static str {
        let name = self.name();
        &name[self.section().len() + 1..]
    }

    /// Current value as a string.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::ChannelEndpoint => config.channel.endpoint.clone(),
            ConfigKey::ChannelConnectTimeoutSecs => config.channel.connect_timeout_secs.to_string(),
            ConfigKey::DownloadsAutoPurgeSecs => config.downloads.auto_purge_secs.to_string(),
            ConfigKey::LoggingDirectory => config.logging.directory.display().to_string(),
            ConfigKey::LoggingLevel => config.logging.level.clone(),
        }
    }

    /// Validate and store a value.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        match self {
            ConfigKey::ChannelEndpoint => {
                if !(value.starts_with("ws://") || value.starts_with("wss://")) {
                    return Err(self.invalid(value, "expected a ws:// or wss:// URL"));
                }
                config.channel.endpoint = value.to_string();
            }
            ConfigKey::ChannelConnectTimeoutSecs => {
                let secs = self.parse_secs(value)?;
                if secs == 0 {
                    return Err(self.invalid(value, "must be at least 1"));
                }
                config.channel.connect_timeout_secs = secs;
            }
            ConfigKey::DownloadsAutoPurgeSecs => {
                config.downloads.auto_purge_secs = self.parse_secs(value)?;
            }
            ConfigKey::LoggingDirectory => {
                if value.is_empty() {
                    return Err(self.invalid(value, "directory must not be empty"));
                }
                config.logging.directory = PathBuf::from(value);
            }
            ConfigKey::LoggingLevel => {
                EnvFilter::try_new(value).map_err(|e| self.invalid(value, &e.to_string()))?;
                config.logging.level = value.to_string();
            }
        }
        Ok(())
    }

    fn parse_secs(&self, value: &str) -> Result<u64, ConfigError> {
        value
            .parse()
            .map_err(|_| self.invalid(value, "expected a whole number of seconds"))
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name().to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}
