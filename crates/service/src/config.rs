use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::database::models::{AssetError, AssetKey};

pub const DEFAULT_CONFIG_FILE: &str = "beacon-mdm.toml";

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `beacon-mdm` configuration, read from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Public URL of the fleet server; callback and push URLs hang off it.
    pub server_url: Url,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// SQLite file; an in-memory database is used when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Base URL of the upstream management proxy.
    pub provider_url: Url,
    /// Test override: permit signup with a loopback server URL.
    #[serde(default)]
    pub allow_localhost_server_url: bool,
    /// Key the stored MDM secrets are encrypted with. At least 32 bytes;
    /// Android MDM cannot be turned on without it.
    #[serde(default)]
    pub server_private_key: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        contents.parse()
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        if tracing::Level::from_str(&config.log_level).is_err() {
            return Err(ConfigError::InvalidLogLevel(config.log_level));
        }
        if let Some(key) = &config.server_private_key {
            AssetKey::new(key)?;
        }
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid server_private_key: {0}")]
    PrivateKey(#[from] AssetError),
}
