use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::server::Row;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("no querier")]
    NoQuerier,

    #[error("Skipping enrollment details")]
    Skipped,

    #[error("expected at least one row")]
    NoRows,

    #[error("failed to start query runtime: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("query runtime exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("could not decode query output: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Runs SQL against the local query runtime.
#[async_trait]
pub trait Querier: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, QueryError>;
}

/// Shells out to `osqueryi --json`.
#[derive(Debug, Clone)]
pub struct OsqueryiQuerier {
    binary: PathBuf,
}

impl OsqueryiQuerier {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Querier for OsqueryiQuerier {
    #[tracing::instrument(skip(self))]
    async fn query(&self, sql: &str) -> Result<Vec<Row>, QueryError> {
        let output = Command::new(&self.binary)
            .arg("--json")
            .arg(sql)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(QueryError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_rows(&output.stdout)
    }
}

/// osqueryi prints every value as a string, but older builds emit bare
/// numbers for some columns.
fn parse_rows(stdout: &[u8]) -> Result<Vec<Row>, QueryError> {
    let raw: Vec<BTreeMap<String, Value>> = serde_json::from_slice(stdout)?;
    Ok(raw
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(column, value)| {
                    let value = match value {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (column, value)
                })
                .collect()
        })
        .collect())
}
