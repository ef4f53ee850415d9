use clap::Args;

use service::database::models::EnrollSecret;

use crate::cli::op::ContextError;

#[derive(Args, Debug, Clone)]
pub struct AddEnrollSecret {
    /// Secret devices present when requesting an enrollment token
    pub secret: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AddEnrollSecretError {
    #[error("{0}")]
    Context(#[from] ContextError),

    #[error("enroll secret must not be empty")]
    Empty,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for AddEnrollSecret {
    type Error = AddEnrollSecretError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        if self.secret.trim().is_empty() {
            return Err(AddEnrollSecretError::Empty);
        }
        let db = ctx.database().await?;
        EnrollSecret::create(&self.secret, &db).await?;
        Ok("enroll secret added".to_string())
    }
}
