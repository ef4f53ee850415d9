//! Typed interface to the management server.
//!
//! Every call that the server can reject because the node key is no longer
//! recognized reports that as [`ClientError::NodeInvalid`], whether the
//! server said so in the body or the transport answered 401.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod http;

pub use http::HttpServerClient;

/// One result row, column name to value.
pub type Row = BTreeMap<String, String>;

/// Host facts sent along with an enrollment request. Every field is optional
/// and left empty when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentDetails {
    pub os_version: String,
    pub os_build: String,
    pub os_name: String,
    pub os_platform: String,
    pub os_platform_like: String,
    pub osquery_version: String,
    pub hardware_model: String,
    pub hardware_serial: String,
    pub hardware_vendor: String,
    pub hostname: String,
    pub hardware_uuid: String,
    pub agent_version: String,
    pub os_family: String,
    pub architecture: String,
}

/// Stream a batch of buffered logs is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishLogType {
    Status,
    Result,
}

impl PublishLogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishLogType::Status => "status",
            PublishLogType::Result => "result",
        }
    }
}

/// Outcome of one distributed query run by the query runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedResult {
    pub query_name: String,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub message: String,
    pub node_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("node invalid: {0}")]
    NodeInvalid(String),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    pub fn is_node_invalid(&self) -> bool {
        matches!(self, ClientError::NodeInvalid(_))
    }
}

#[async_trait]
pub trait ServerClient: Send + Sync {
    /// Exchange the enroll secret and host facts for a node key.
    async fn request_enrollment(
        &self,
        enroll_secret: &str,
        host_identifier: &str,
        details: &EnrollmentDetails,
    ) -> Result<String, ClientError>;

    /// Fetch the raw configuration JSON.
    async fn request_config(&self, node_key: &str) -> Result<String, ClientError>;

    /// Fetch the pending distributed queries, name to SQL.
    async fn request_queries(&self, node_key: &str)
        -> Result<BTreeMap<String, String>, ClientError>;

    async fn publish_logs(
        &self,
        node_key: &str,
        log_type: PublishLogType,
        logs: &[String],
    ) -> Result<PublishReceipt, ClientError>;

    async fn publish_results(
        &self,
        node_key: &str,
        results: &[DistributedResult],
    ) -> Result<PublishReceipt, ClientError>;
}
