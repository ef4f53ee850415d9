use std::path::PathBuf;
use std::time::Duration;

use crate::enroll::EnrollOptions;
use crate::logbuf::LogBufferConfig;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct Config {
    // management server
    pub server_url: String,
    pub enroll_secret: String,
    pub request_timeout: Duration,
    pub insecure_skip_verify: bool,

    /// Port for the local plugin API, bound to 127.0.0.1
    pub api_port: u16,

    /// Path to the agent store. In-memory when unset.
    pub store_path: Option<PathBuf>,

    pub log_buffer: LogBufferConfig,
    pub enroll: EnrollOptions,
    /// Binary used to run queries. No querier is configured when unset.
    pub osqueryi_path: Option<PathBuf>,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Daemon configuration for an initialized state directory.
    pub fn from_app_state(state: &AppState) -> Self {
        let config = &state.config;
        let enroll = EnrollOptions {
            run_initial_queries: config.run_initial_queries,
            ..EnrollOptions::from_env()
        };

        Self {
            server_url: config.server_url.clone(),
            enroll_secret: config.enroll_secret.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            insecure_skip_verify: config.insecure_skip_verify,
            api_port: config.api_port,
            store_path: Some(state.db_path.clone()),
            log_buffer: config.log_buffer(),
            enroll,
            osqueryi_path: (!config.osqueryi_path.is_empty())
                .then(|| PathBuf::from(&config.osqueryi_path)),
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }
}
