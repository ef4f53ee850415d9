use clap::Args;

use service::android::{random_token, SIGNUP_TOKEN_BYTES};
use service::database::models::{Role, Session, User};

use crate::cli::op::ContextError;

#[derive(Args, Debug, Clone)]
pub struct AddUser {
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub email: String,

    /// One of admin, maintainer or observer
    #[arg(long, default_value = "observer")]
    pub role: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AddUserError {
    #[error("{0}")]
    Context(#[from] ContextError),

    #[error("{0}")]
    Role(#[from] service::database::models::UnknownRole),

    #[error("failed to generate session token: {0}")]
    Token(getrandom::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for AddUser {
    type Error = AddUserError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let role: Role = self.role.parse()?;
        let db = ctx.database().await?;

        let user = User::create(&self.name, &self.email, role, &db).await?;
        let token = random_token(SIGNUP_TOKEN_BYTES).map_err(AddUserError::Token)?;
        Session::create(user.id, &token, &db).await?;

        Ok(format!(
            "Created {} user {} <{}>\nSession token: {}",
            role, user.name, user.email, token
        ))
    }
}
