//! Durable log buffer.
//!
//! Lines are appended to a per-stream bucket under big-endian sequence keys,
//! so key order is insertion order. A single flush task drains each bucket
//! in batches bounded by [`LogBufferConfig::max_bytes_per_batch`] and only
//! deletes what the server accepted (or what could never be sent).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use common::kv::{key_from_u64, Bucket, Store, StoreError};

use crate::enroll::{AgentError, Enrollment};
use crate::server::PublishLogType;

/// Bytes of an oversize record kept in the drop warning.
const LOG_HEAD_BYTES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Status,
    String,
    Snapshot,
    Init,
}

impl FromStr for LogType {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(LogType::Status),
            "string" | "result" => Ok(LogType::String),
            "snapshot" => Ok(LogType::Snapshot),
            "init" => Ok(LogType::Init),
            other => Err(LogError::UnknownType(other.to_string())),
        }
    }
}

impl LogType {
    /// Bucket the type is buffered in, `None` for types that are discarded.
    fn bucket(self) -> Option<Bucket> {
        match self {
            LogType::Init => None,
            LogType::Status => Some(Bucket::StatusLogs),
            LogType::String | LogType::Snapshot => Some(Bucket::ResultLogs),
        }
    }

    fn publish_type(self) -> PublishLogType {
        match self {
            LogType::Status => PublishLogType::Status,
            _ => PublishLogType::Result,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("unknown log type: {0}")]
    UnknownType(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("publishing logs: {0}")]
    Publish(#[from] AgentError),
}

#[derive(Debug, Clone)]
pub struct LogBufferConfig {
    pub max_bytes_per_batch: usize,
    pub logging_interval: Duration,
    pub max_buffered_logs: u64,
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            // stays under the 4 MiB frame limit most RPC stacks enforce
            max_bytes_per_batch: 3 << 20,
            logging_interval: Duration::from_secs(60),
            max_buffered_logs: 500_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogBuffer {
    store: Store,
    enrollment: Arc<Enrollment>,
    config: LogBufferConfig,
}

/// Handle to the running flush task.
#[derive(Debug)]
pub struct FlushHandle {
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl FlushHandle {
    /// Stop the flush loop and wait for it to exit. A cycle already in
    /// progress is allowed to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "log flush task did not exit cleanly");
        }
    }
}

impl LogBuffer {
    pub fn new(store: Store, enrollment: Arc<Enrollment>, config: LogBufferConfig) -> Self {
        Self {
            store,
            enrollment,
            config,
        }
    }

    pub fn config(&self) -> &LogBufferConfig {
        &self.config
    }

    /// Buffer one line. `init` lines are accepted and discarded.
    pub async fn log_string(&self, log_type: LogType, line: &str) -> Result<(), LogError> {
        let Some(bucket) = log_type.bucket() else {
            return Ok(());
        };

        let mut tx = self.store.update().await?;
        let seq = tx.next_sequence(bucket).await?;
        tx.put(bucket, &key_from_u64(seq), line.as_bytes()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Publish one batch from the bucket of `log_type`, then delete what was
    /// published along with any records too large to ever be sent.
    #[tracing::instrument(skip(self))]
    pub async fn write_buffered_logs(&self, log_type: LogType) -> Result<usize, LogError> {
        let Some(bucket) = log_type.bucket() else {
            return Ok(0);
        };
        let limit = self.config.max_bytes_per_batch;

        let mut batch = Vec::new();
        let mut sent_keys = Vec::new();
        let mut dropped_keys = Vec::new();
        {
            let mut tx = self.store.view().await?;
            let mut cursor = tx.cursor(bucket);
            let mut total = 0usize;
            while let Some((key, value)) = cursor.next().await? {
                if value.len() > limit {
                    let head = &value[..value.len().min(LOG_HEAD_BYTES)];
                    tracing::info!(
                        log_id = %hex::encode(&key),
                        size = value.len(),
                        limit,
                        log_head = %String::from_utf8_lossy(head),
                        "dropped log exceeding batch size limit"
                    );
                    dropped_keys.push(key);
                    continue;
                }
                if total + value.len() > limit {
                    break;
                }
                total += value.len();
                batch.push(String::from_utf8_lossy(&value).into_owned());
                sent_keys.push(key);
            }
        }

        if !batch.is_empty() {
            self.enrollment
                .publish_logs(log_type.publish_type(), &batch)
                .await?;
        }

        if sent_keys.is_empty() && dropped_keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self.store.update().await?;
        for key in sent_keys.iter().chain(dropped_keys.iter()) {
            tx.delete(bucket, key).await?;
        }
        tx.commit().await?;

        Ok(batch.len())
    }

    /// Trim the bucket of `log_type` down to the newest
    /// `max_buffered_logs` records. Returns how many were removed.
    pub async fn purge_buffered_logs(&self, log_type: LogType) -> Result<u64, LogError> {
        let Some(bucket) = log_type.bucket() else {
            return Ok(0);
        };

        let mut tx = self.store.update().await?;
        let count = tx.count(bucket).await?;
        if count <= self.config.max_buffered_logs {
            return Ok(0);
        }
        let removed = tx
            .delete_first(bucket, count - self.config.max_buffered_logs)
            .await?;
        tx.commit().await?;

        tracing::info!(%bucket, removed, "purged buffered logs over retention limit");
        Ok(removed)
    }

    /// One flush cycle over every buffered stream. Errors are logged.
    pub async fn write_and_purge(&self) {
        for log_type in [LogType::Status, LogType::String] {
            if let Err(e) = self.write_buffered_logs(log_type).await {
                tracing::warn!(?log_type, error = %e, "sending buffered logs failed");
            }
            if let Err(e) = self.purge_buffered_logs(log_type).await {
                tracing::warn!(?log_type, error = %e, "purging buffered logs failed");
            }
        }
    }

    /// Spawn the flush loop. It flushes immediately, then once per
    /// `logging_interval` until shut down.
    pub fn start(&self) -> FlushHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let buffer = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(
                buffer.config.logging_interval.max(Duration::from_millis(1)),
            );
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                buffer.write_and_purge().await;
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("log flush loop shutting down");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
            }
        });

        FlushHandle {
            shutdown_tx,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_type_parsing() {
        assert_eq!("status".parse::<LogType>().unwrap(), LogType::Status);
        assert_eq!("string".parse::<LogType>().unwrap(), LogType::String);
        assert_eq!("result".parse::<LogType>().unwrap(), LogType::String);
        assert_eq!("snapshot".parse::<LogType>().unwrap(), LogType::Snapshot);
        assert!(matches!(
            "verbose".parse::<LogType>(),
            Err(LogError::UnknownType(t)) if t == "verbose"
        ));
        assert!(matches!(
            "health".parse::<LogType>(),
            Err(LogError::UnknownType(t)) if t == "health"
        ));
    }

    #[test]
    fn test_bucket_mapping() {
        assert_eq!(LogType::Status.bucket(), Some(Bucket::StatusLogs));
        assert_eq!(LogType::String.bucket(), Some(Bucket::ResultLogs));
        assert_eq!(LogType::Snapshot.bucket(), Some(Bucket::ResultLogs));
        assert_eq!(LogType::Init.bucket(), None);
    }
}
