use std::sync::Arc;

use url::Url;

use common::kv::{Store, StoreError};

use crate::enroll::{EnrollError, Enrollment};
use crate::logbuf::LogBuffer;
use crate::querier::{OsqueryiQuerier, Querier};
use crate::server::{ClientError, HttpServerClient, ServerClient};
use crate::ServiceConfig;

/// Everything the running agent shares between its tasks.
#[derive(Debug, Clone)]
pub struct State {
    store: Store,
    enrollment: Arc<Enrollment>,
    logs: LogBuffer,
}

impl State {
    pub async fn from_config(config: &ServiceConfig) -> Result<Self, StateSetupError> {
        let store = match &config.store_path {
            Some(path) => {
                tracing::info!(path = ?path, "opening agent store");
                Store::open(path).await?
            }
            None => {
                tracing::debug!("using in-memory agent store");
                Store::in_memory().await?
            }
        };

        let server_url = Url::parse(&config.server_url).map_err(ClientError::from)?;
        let client = HttpServerClient::new(
            server_url,
            config.request_timeout,
            config.insecure_skip_verify,
        )?;
        let querier = config
            .osqueryi_path
            .as_ref()
            .map(|path| Arc::new(OsqueryiQuerier::new(path)) as Arc<dyn Querier>);

        Self::with_collaborators(store, Arc::new(client), querier, config).await
    }

    /// Build state over an already-opened store with the given server and
    /// query runtime.
    pub async fn with_collaborators(
        store: Store,
        client: Arc<dyn ServerClient>,
        querier: Option<Arc<dyn Querier>>,
        config: &ServiceConfig,
    ) -> Result<Self, StateSetupError> {
        let enrollment = Enrollment::new(
            store.clone(),
            client,
            querier,
            config.enroll_secret.clone(),
            config.enroll.clone(),
        )
        .await?;
        let enrollment = Arc::new(enrollment);
        let logs = LogBuffer::new(store.clone(), enrollment.clone(), config.log_buffer.clone());

        Ok(Self {
            store,
            enrollment,
            logs,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn enrollment(&self) -> &Arc<Enrollment> {
        &self.enrollment
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("store setup error: {0}")]
    Store(#[from] StoreError),

    #[error("server client setup error: {0}")]
    Client(#[from] ClientError),

    #[error("enrollment setup error: {0}")]
    Enrollment(#[from] EnrollError),
}
