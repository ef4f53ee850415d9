use clap::Args;

use beacon_daemon::http_server::health::readiness::ReadinessRequest;
use beacon_daemon::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Health;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {}

#[async_trait::async_trait]
impl crate::cli::op::Op for Health {
    type Error = HealthError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut lines = Vec::new();

        lines.push("Config:".to_string());
        match AppState::load(ctx.config_path.clone()) {
            Ok(state) => {
                lines.push(format!("  directory:    {}", state.beacon_dir.display()));
                lines.push("  config.toml:  OK".to_string());
                let store = if state.db_path.exists() { "OK" } else { "not created yet" };
                lines.push(format!("  beacon.db:    {}", store));
                lines.push(format!("  server_url:   {}", state.config.server_url));
                lines.push(format!("  api_port:     {}", state.config.api_port));
            }
            Err(e) => {
                lines.push(format!("  error: {}", e));
            }
        }

        lines.push(String::new());
        lines.push(format!("Agent ({}):", ctx.client.base_url()));
        match ctx.client.call(ReadinessRequest).await {
            Ok(_) => lines.push("  readyz: OK".to_string()),
            Err(e) if e.is_unreachable() => lines.push("  readyz: NOT REACHABLE".to_string()),
            Err(e) => lines.push(format!("  readyz: UNHEALTHY ({})", e)),
        }

        Ok(lines.join("\n"))
    }
}
