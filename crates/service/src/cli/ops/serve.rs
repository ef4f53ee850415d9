use clap::Args;

use service::config::ConfigError;
use service::spawn_service;

#[derive(Args, Debug, Clone)]
pub struct Serve {
    /// Override the listen address from the configuration
    #[arg(long)]
    pub listen_addr: Option<std::net::SocketAddr>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Serve {
    type Error = ServeError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = ctx.config()?;
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }

        spawn_service(&config).await;
        Ok("service stopped".to_string())
    }
}
