use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use common::identity::IdentityError;
use common::kv::{Bucket, Store, StoreError};

use crate::querier::Querier;
use crate::server::Row;

/// Packs whose name contains this marker are replayed once on first sight.
pub const INITIAL_PACK_MARKER: &str = "_kolide_";

const RUN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum InitialRunError {
    #[error("could not parse config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Deserialize)]
struct OsqueryConfig {
    #[serde(default)]
    packs: BTreeMap<String, Pack>,
}

#[derive(Debug, Default, Deserialize)]
struct Pack {
    #[serde(default)]
    queries: BTreeMap<String, PackQuery>,
}

#[derive(Debug, Default, Deserialize)]
struct PackQuery {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitialResult<'a> {
    name: &'a str,
    host_identifier: &'a str,
    unix_time: i64,
    diff_results: DiffResults,
}

#[derive(Debug, Serialize)]
struct DiffResults {
    added: Vec<Row>,
}

/// Replays newly seen marker-pack queries once and remembers which ones ran.
pub struct InitialRunner<'a> {
    store: &'a Store,
    querier: Option<&'a dyn Querier>,
    enabled: bool,
}

impl<'a> InitialRunner<'a> {
    pub fn new(store: &'a Store, querier: Option<&'a dyn Querier>, enabled: bool) -> Self {
        Self {
            store,
            querier,
            enabled,
        }
    }

    /// Run every marker-pack query not already recorded, publishing each
    /// non-empty result through `publish`. Returns the identifiers recorded.
    pub async fn run<F, Fut, E>(
        &self,
        config: &str,
        host_identifier: &str,
        mut publish: F,
    ) -> Result<Vec<String>, InitialRunError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let config: OsqueryConfig = serde_json::from_str(config)?;
        let pending = self.pending(&config).await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        match (self.enabled, self.querier) {
            (true, Some(querier)) => {
                let deadline = Instant::now() + RUN_TIMEOUT;
                for (name, sql) in &pending {
                    let rows = match tokio::time::timeout_at(deadline, querier.query(sql)).await {
                        Ok(Ok(rows)) if !rows.is_empty() => rows,
                        Ok(Ok(_)) => continue,
                        Ok(Err(e)) => {
                            tracing::debug!(query = %name, error = %e, "initial query failed");
                            continue;
                        }
                        Err(_) => {
                            tracing::debug!(query = %name, "initial query run timed out");
                            continue;
                        }
                    };

                    let line = serde_json::to_string(&InitialResult {
                        name,
                        host_identifier,
                        unix_time: chrono::Utc::now().timestamp(),
                        diff_results: DiffResults { added: rows },
                    })?;
                    if let Err(e) = publish(line).await {
                        tracing::warn!(query = %name, error = %e, "publishing initial result failed");
                    }
                }
            }
            (true, None) => tracing::debug!("no querier, recording initial queries without running"),
            (false, _) => tracing::debug!("initial runner disabled, recording queries only"),
        }

        let mut tx = self.store.update().await?;
        for (name, _) in &pending {
            tx.put(Bucket::InitialResults, name.as_bytes(), name.as_bytes())
                .await?;
        }
        tx.commit().await?;

        Ok(pending.into_keys().collect())
    }

    async fn pending(&self, config: &OsqueryConfig) -> Result<BTreeMap<String, String>, StoreError> {
        let mut tx = self.store.view().await?;
        let mut pending = BTreeMap::new();
        for (pack_name, pack) in &config.packs {
            if !pack_name.contains(INITIAL_PACK_MARKER) {
                continue;
            }
            for (query_name, query) in &pack.queries {
                let name = format!("pack:{pack_name}:{query_name}");
                if tx.get(Bucket::InitialResults, name.as_bytes()).await?.is_none() {
                    pending.insert(name, query.query.clone());
                }
            }
        }
        Ok(pending)
    }
}
