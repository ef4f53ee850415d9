use std::error::Error;
use std::path::PathBuf;

use url::Url;

use beacon_daemon::http_server::api::client::{ApiClient, ApiError};
use beacon_daemon::state::AppState;

const DEFAULT_API_PORT: u16 = 8089;

/// Resolve the plugin API URL of the local agent.
///
/// Priority: explicit `--remote` flag > config file `api_port` > 8089.
pub fn resolve_remote(explicit: Option<Url>, config_path: Option<PathBuf>) -> Result<Url, url::ParseError> {
    if let Some(url) = explicit {
        return Ok(url);
    }
    let port = AppState::load(config_path)
        .map(|state| state.config.api_port)
        .unwrap_or(DEFAULT_API_PORT);
    Url::parse(&format!("http://127.0.0.1:{}", port))
}


#[derive(Clone)]
pub struct OpContext {
    /// Plugin API client for the local agent
    pub client: ApiClient,
    /// Optional custom state directory (defaults to ~/.beacon)
    pub config_path: Option<PathBuf>,
}

impl OpContext {
    pub fn new(remote: Url, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        Ok(Self {
            client: ApiClient::new(&remote)?,
            config_path,
        })
    }
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
