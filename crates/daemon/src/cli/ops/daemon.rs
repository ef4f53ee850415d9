use clap::Args;

use beacon_daemon::state::{AppState, StateError};
use beacon_daemon::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Override plugin API port (default from config)
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Directory for log files (defaults to the state directory's logs/)
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,

    /// Log to stdout only
    #[arg(long, conflicts_with = "log_dir")]
    pub no_log_file: bool,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;

        let mut config = ServiceConfig::from_app_state(&state);
        if let Some(port) = self.api_port {
            config.api_port = port;
        }
        config.log_level = self.log_level;
        config.log_dir = match (&self.log_dir, self.no_log_file) {
            (_, true) => None,
            (Some(dir), false) => Some(dir.clone()),
            (None, false) => Some(state.logs_path.clone()),
        };

        spawn_service(&config).await;
        Ok("daemon ended".to_string())
    }
}
