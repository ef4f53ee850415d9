use clap::Args;

use beacon_daemon::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Base URL of the management server
    #[arg(long)]
    pub server_url: String,

    /// Enroll secret issued by the management server
    #[arg(long, env = "BEACON_ENROLL_SECRET")]
    pub enroll_secret: String,

    /// Port for the local plugin API
    #[arg(long, default_value_t = 8089)]
    pub api_port: u16,

    /// Path to the osqueryi binary used for host queries
    #[arg(long, default_value = "osqueryi")]
    pub osqueryi_path: String,

    /// Accept invalid TLS certificates from the management server
    #[arg(long)]
    pub insecure_skip_verify: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig::new(&self.server_url, &self.enroll_secret);
        config.api_port = self.api_port;
        config.osqueryi_path = self.osqueryi_path.clone();
        config.insecure_skip_verify = self.insecure_skip_verify;

        let state = AppState::init(ctx.config_path.clone(), config)?;

        Ok(format!(
            "Initialized beacon directory at: {}\n\
             - Store: {}\n\
             - Config: {}\n\
             - Server: {}\n\
             - Plugin API port: {}",
            state.beacon_dir.display(),
            state.db_path.display(),
            state.config_path.display(),
            state.config.server_url,
            state.config.api_port,
        ))
    }
}
