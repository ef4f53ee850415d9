//! Enrollment coordinator.
//!
//! Owns the node key. Every attempt to obtain one runs under a single
//! async mutex, and every server call that can be rejected for a stale key
//! goes through [`Enrollment::with_reenroll`], which re-enrolls and retries
//! at most once.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use common::identity::{Identity, IdentityError};
use common::kv::{Bucket, Store, StoreError};

use crate::querier::Querier;
use crate::server::{ClientError, DistributedResult, PublishLogType, PublishReceipt, ServerClient};

mod details;
mod initial;

pub use details::FINGERPRINT_QUERY;
pub use initial::{InitialRunError, InitialRunner, INITIAL_PACK_MARKER};

pub const NODE_KEY_KEY: &[u8] = b"nodeKey";
pub const CONFIG_KEY: &[u8] = b"config";

pub const DETAILS_REQUIRED_ENV: &str = "LAUNCHER_DEBUG_ENROLL_DETAILS_REQUIRED";
pub const DETAILS_ERROR_ENV: &str = "LAUNCHER_DEBUG_ENROLL_DETAILS_ERROR";

#[derive(Debug, Clone)]
pub struct EnrollOptions {
    /// Fail enrollment when host details cannot be collected.
    pub details_required: bool,
    /// Skip the details query entirely and report a sentinel error.
    pub skip_details: bool,
    pub details_timeout: Duration,
    pub details_interval: Duration,
    /// When off, first-sight queries are recorded but never executed.
    pub run_initial_queries: bool,
}

impl Default for EnrollOptions {
    fn default() -> Self {
        Self {
            details_required: false,
            skip_details: false,
            details_timeout: Duration::from_secs(120),
            details_interval: Duration::from_secs(10),
            run_initial_queries: true,
        }
    }
}

impl EnrollOptions {
    pub fn from_env() -> Self {
        let flag = |name: &str| std::env::var(name).map(|v| v == "true").unwrap_or(false);
        Self {
            details_required: flag(DETAILS_REQUIRED_ENV),
            skip_details: flag(DETAILS_ERROR_ENV),
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    #[error("empty enroll secret")]
    EmptySecret,

    #[error("enrollment invalid: {0}")]
    Invalid(String),

    #[error("transport error in enrollment: {0}")]
    Transport(#[source] ClientError),

    #[error("query enrollment details: {0}")]
    Details(String),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("enrollment invalid, reenrollment errored: {0}")]
    ReenrollmentErrored(#[source] Box<EnrollError>),

    #[error("enrollment invalid, reenrollment invalid")]
    ReenrollmentInvalid,

    #[error("transport error in {op}: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct Enrollment {
    store: Store,
    identity: Identity,
    client: Arc<dyn ServerClient>,
    querier: Option<Arc<dyn Querier>>,
    enroll_secret: String,
    options: EnrollOptions,
    enroll_lock: Mutex<()>,
    // written only while holding `enroll_lock`
    node_key: RwLock<String>,
}

impl std::fmt::Debug for Enrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enrollment")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Enrollment {
    /// Build the coordinator over an opened store. Ensures the host key pair
    /// exists and picks up a previously stored node key.
    pub async fn new(
        store: Store,
        client: Arc<dyn ServerClient>,
        querier: Option<Arc<dyn Querier>>,
        enroll_secret: impl Into<String>,
        options: EnrollOptions,
    ) -> Result<Self, EnrollError> {
        let enroll_secret = enroll_secret.into();
        if enroll_secret.is_empty() {
            return Err(EnrollError::EmptySecret);
        }

        let identity = Identity::new(store.clone());
        identity.ensure_keys().await?;

        let node_key = store
            .get(Bucket::Config, NODE_KEY_KEY)
            .await?
            .map(|k| String::from_utf8_lossy(&k).into_owned())
            .unwrap_or_default();

        Ok(Self {
            store,
            identity,
            client,
            querier,
            enroll_secret,
            options,
            enroll_lock: Mutex::new(()),
            node_key: RwLock::new(node_key),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The node key currently held in memory, empty when not enrolled.
    pub fn node_key(&self) -> String {
        self.node_key.read().clone()
    }

    /// Produce a node key, asking the server for one only when neither
    /// memory nor the store has it.
    #[tracing::instrument(skip(self))]
    pub async fn enroll(&self) -> Result<String, EnrollError> {
        let _guard = self.enroll_lock.lock().await;

        let cached = self.node_key();
        if !cached.is_empty() {
            return Ok(cached);
        }

        if let Some(stored) = self.store.get(Bucket::Config, NODE_KEY_KEY).await? {
            let stored = String::from_utf8_lossy(&stored).into_owned();
            if !stored.is_empty() {
                *self.node_key.write() = stored.clone();
                return Ok(stored);
            }
        }

        let host_identifier = self.identity.host_identifier().await?;
        let details = details::collect(self.querier.as_deref(), &self.options).await?;

        let node_key = match self
            .client
            .request_enrollment(&self.enroll_secret, &host_identifier, &details)
            .await
        {
            Ok(key) if key.is_empty() => {
                return Err(EnrollError::Invalid("server returned an empty node key".into()))
            }
            Ok(key) => key,
            Err(ClientError::NodeInvalid(message)) => return Err(EnrollError::Invalid(message)),
            Err(e) => return Err(EnrollError::Transport(e)),
        };

        self.store
            .put(Bucket::Config, NODE_KEY_KEY, node_key.as_bytes())
            .await?;
        *self.node_key.write() = node_key.clone();

        tracing::info!(host_identifier = %host_identifier, "enrolled with server");
        Ok(node_key)
    }

    /// Forget the node key so the next [`Enrollment::enroll`] goes back to
    /// the server.
    pub async fn require_reenroll(&self) -> Result<(), StoreError> {
        let _guard = self.enroll_lock.lock().await;
        self.node_key.write().clear();
        self.store.delete(Bucket::Config, NODE_KEY_KEY).await
    }

    /// Run `call` with the current node key. If the server rejects the key,
    /// re-enroll once and run it one more time.
    async fn with_reenroll<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, AgentError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut reenroll = true;
        loop {
            match call(self.node_key()).await {
                Ok(value) => return Ok(value),
                Err(ClientError::NodeInvalid(message)) if reenroll => {
                    reenroll = false;
                    tracing::info!(op, %message, "node key rejected, re-enrolling");

                    self.require_reenroll().await?;
                    match self.enroll().await {
                        Ok(_) => {}
                        Err(EnrollError::Invalid(_)) => return Err(AgentError::ReenrollmentInvalid),
                        Err(e) => return Err(AgentError::ReenrollmentErrored(Box::new(e))),
                    }
                }
                Err(ClientError::NodeInvalid(_)) => return Err(AgentError::ReenrollmentInvalid),
                Err(source) => return Err(AgentError::Transport { op, source }),
            }
        }
    }

    /// Fetch the configuration for the query runtime, falling back to the
    /// last one that was fetched successfully.
    #[tracing::instrument(skip(self))]
    pub async fn generate_configs(&self) -> Result<BTreeMap<String, String>, AgentError> {
        let fetched = self
            .with_reenroll("request config", |key| async move {
                self.client.request_config(&key).await
            })
            .await;

        let config = match fetched {
            Ok(config) => config,
            Err(e) => {
                tracing::info!(error = %e, "fetching config failed, trying cached config");
                return match self.store.get(Bucket::Config, CONFIG_KEY).await? {
                    Some(cached) if !cached.is_empty() => Ok(config_map(
                        String::from_utf8_lossy(&cached).into_owned(),
                    )),
                    _ => Err(e),
                };
            }
        };

        self.store
            .put(Bucket::Config, CONFIG_KEY, config.as_bytes())
            .await?;

        if let Err(e) = self.run_initial_queries(&config).await {
            tracing::warn!(error = %e, "initial query run failed");
        }

        Ok(config_map(config))
    }

    async fn run_initial_queries(&self, config: &str) -> Result<(), InitialRunError> {
        let host_identifier = self.identity.host_identifier().await?;
        let runner = InitialRunner::new(
            &self.store,
            self.querier.as_deref(),
            self.options.run_initial_queries,
        );
        runner
            .run(config, &host_identifier, |line| async move {
                let lines = [line];
                self.publish_logs(PublishLogType::Result, &lines)
                    .await
                    .map(|_| ())
            })
            .await?;
        Ok(())
    }

    /// Pending distributed queries, name to SQL.
    pub async fn get_queries(&self) -> Result<BTreeMap<String, String>, AgentError> {
        self.with_reenroll("request queries", |key| async move {
            self.client.request_queries(&key).await
        })
        .await
    }

    pub async fn write_results(
        &self,
        results: &[DistributedResult],
    ) -> Result<PublishReceipt, AgentError> {
        self.with_reenroll("publish results", |key| async move {
            self.client.publish_results(&key, results).await
        })
        .await
    }

    pub async fn publish_logs(
        &self,
        log_type: PublishLogType,
        logs: &[String],
    ) -> Result<PublishReceipt, AgentError> {
        self.with_reenroll("publish logs", |key| async move {
            self.client.publish_logs(&key, log_type, logs).await
        })
        .await
    }
}

fn config_map(config: String) -> BTreeMap<String, String> {
    BTreeMap::from([("config".to_string(), config)])
}
