use std::error::Error;
use std::path::PathBuf;

use service::config::{Config, ConfigError};
use service::{Database, DatabaseSetupError};

#[derive(Clone, Debug)]
pub struct OpContext {
    pub config_path: PathBuf,
}

impl OpContext {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config(&self) -> Result<Config, ConfigError> {
        Config::load(&self.config_path)
    }

    /// Open the configured database file. Administrative commands refuse to
    /// run against a throwaway in-memory database.
    pub async fn database(&self) -> Result<Database, ContextError> {
        let config = self.config()?;
        let path = config
            .database_path
            .ok_or(ContextError::NoDatabasePath)?;
        Ok(Database::connect(&path).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("database_path is not set in the configuration")]
    NoDatabasePath,

    #[error("{0}")]
    Database(#[from] DatabaseSetupError),
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}
