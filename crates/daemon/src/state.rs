use std::time::Duration;
use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::logbuf::LogBufferConfig;

pub const APP_NAME: &str = "beacon";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "beacon.db";
pub const LOGS_DIR_NAME: &str = "logs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the management server
    pub server_url: String,
    /// Shared secret used for the first enrollment
    pub enroll_secret: String,
    /// Port of the local plugin API (always bound to loopback)
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_logging_interval_secs")]
    pub logging_interval_secs: u64,
    #[serde(default = "default_max_bytes_per_batch")]
    pub max_bytes_per_batch: usize,
    #[serde(default = "default_max_buffered_logs")]
    pub max_buffered_logs: u64,
    #[serde(default = "default_true")]
    pub run_initial_queries: bool,
    #[serde(default = "default_osqueryi_path")]
    pub osqueryi_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_api_port() -> u16 {
    8089
}

fn default_logging_interval_secs() -> u64 {
    60
}

fn default_max_bytes_per_batch() -> usize {
    3 << 20
}

fn default_max_buffered_logs() -> u64 {
    500_000
}

fn default_true() -> bool {
    true
}

fn default_osqueryi_path() -> String {
    "osqueryi".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn new(server_url: impl Into<String>, enroll_secret: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            enroll_secret: enroll_secret.into(),
            api_port: default_api_port(),
            logging_interval_secs: default_logging_interval_secs(),
            max_bytes_per_batch: default_max_bytes_per_batch(),
            max_buffered_logs: default_max_buffered_logs(),
            run_initial_queries: default_true(),
            osqueryi_path: default_osqueryi_path(),
            request_timeout_secs: default_request_timeout_secs(),
            insecure_skip_verify: false,
        }
    }

    pub fn log_buffer(&self) -> LogBufferConfig {
        LogBufferConfig {
            max_bytes_per_batch: self.max_bytes_per_batch,
            logging_interval: Duration::from_secs(self.logging_interval_secs),
            max_buffered_logs: self.max_buffered_logs,
        }
    }
}

/// The on-disk layout of an agent installation.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.beacon)
    pub beacon_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_path: PathBuf,
    pub config_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// The state directory, custom or `~/.beacon`.
    pub fn beacon_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Create a fresh state directory holding `config`. The store itself is
    /// created on first daemon start.
    pub fn init(custom_path: Option<PathBuf>, config: AppConfig) -> Result<Self, StateError> {
        if config.enroll_secret.is_empty() {
            return Err(StateError::InvalidConfig("enroll_secret must not be empty".into()));
        }
        url::Url::parse(&config.server_url)
            .map_err(|e| StateError::InvalidConfig(format!("server_url: {e}")))?;

        let beacon_dir = Self::beacon_dir(custom_path)?;
        if beacon_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&beacon_dir)?;
        let logs_path = beacon_dir.join(LOGS_DIR_NAME);
        fs::create_dir_all(&logs_path)?;

        let config_path = beacon_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        Ok(Self {
            db_path: beacon_dir.join(DB_FILE_NAME),
            beacon_dir,
            logs_path,
            config_path,
            config,
        })
    }

    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let beacon_dir = Self::beacon_dir(custom_path)?;
        if !beacon_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_path = beacon_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;
        if config.enroll_secret.is_empty() {
            return Err(StateError::InvalidConfig("enroll_secret must not be empty".into()));
        }

        Ok(Self {
            db_path: beacon_dir.join(DB_FILE_NAME),
            logs_path: beacon_dir.join(LOGS_DIR_NAME),
            beacon_dir,
            config_path,
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("beacon directory not initialized. Run 'beacon init' first")]
    NotInitialized,

    #[error("beacon directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beacon");
        let config = AppConfig::new("https://fleet.example.com", "s3cret");

        let state = AppState::init(Some(path.clone()), config.clone()).unwrap();
        assert!(state.config_path.exists());
        assert!(state.logs_path.is_dir());

        let loaded = AppState::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.config, config);
        assert_eq!(loaded.db_path, path.join(DB_FILE_NAME));

        assert!(matches!(
            AppState::init(Some(path), config),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "server_url = \"https://fleet.example.com\"\nenroll_secret = \"abc\"\n",
        )
        .unwrap();

        let state = AppState::load(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(state.config.api_port, 8089);
        assert_eq!(state.config.max_bytes_per_batch, 3 << 20);
        assert_eq!(state.config.max_buffered_logs, 500_000);
        assert!(state.config.run_initial_queries);
        assert_eq!(state.config.log_buffer().logging_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_empty_secret_and_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::init(
                Some(dir.path().join("x")),
                AppConfig::new("https://fleet.example.com", "")
            ),
            Err(StateError::InvalidConfig(_))
        ));
        assert!(matches!(
            AppState::load(Some(dir.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }
}
