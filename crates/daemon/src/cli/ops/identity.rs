use clap::Args;

use beacon_daemon::http_server::api::client::ApiError;
use beacon_daemon::http_server::health::identity::IdentityRequest;

#[derive(Args, Debug, Clone)]
pub struct Identity;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("could not read agent identity: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Identity {
    type Error = IdentityError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let identity = ctx.client.call(IdentityRequest).await?;
        Ok(format!(
            "host_identifier: {}\nfingerprint:     {}\nenrolled:        {}",
            identity.host_identifier, identity.fingerprint, identity.enrolled
        ))
    }
}
