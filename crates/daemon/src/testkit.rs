//! In-process fakes for the server and the query runtime.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::querier::{QueryError, Querier};
use crate::server::{
    ClientError, DistributedResult, EnrollmentDetails, PublishLogType, PublishReceipt, Row,
    ServerClient,
};

/// A management server that tracks which node key it issued last and
/// rejects every other key as invalid.
#[derive(Debug, Default)]
pub struct MockServerClient {
    state: Mutex<MockState>,
    enroll_calls: AtomicUsize,
    config_calls: AtomicUsize,
    query_calls: AtomicUsize,
    publish_calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct MockState {
    next_keys: VecDeque<String>,
    issued: usize,
    current_key: Option<String>,
    reject_enrollment: bool,
    reject_publishes: bool,
    fail_config: bool,
    config: String,
    queries: BTreeMap<String, String>,
    enrolled_details: Vec<EnrollmentDetails>,
    published: Vec<(PublishLogType, Vec<String>)>,
    results: Vec<DistributedResult>,
}

impl MockServerClient {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.state.lock().config = "{}".to_string();
        mock
    }

    /// Keys handed out by successive enrollments. Once exhausted, keys are
    /// generated as `nk<n>`.
    pub fn with_node_keys<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .next_keys
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Treat `key` as already issued, as if enrollment happened earlier.
    pub fn with_current_key(self, key: impl Into<String>) -> Self {
        self.state.lock().current_key = Some(key.into());
        self
    }

    pub fn with_config(self, config: impl Into<String>) -> Self {
        self.state.lock().config = config.into();
        self
    }

    pub fn with_queries(self, queries: BTreeMap<String, String>) -> Self {
        self.state.lock().queries = queries;
        self
    }

    pub fn reject_enrollment(&self, reject: bool) {
        self.state.lock().reject_enrollment = reject;
    }

    pub fn reject_publishes(&self, reject: bool) {
        self.state.lock().reject_publishes = reject;
    }

    pub fn fail_config(&self, fail: bool) {
        self.state.lock().fail_config = fail;
    }

    /// Forget the issued key so the next call with it is rejected.
    pub fn invalidate_node_key(&self) {
        self.state.lock().current_key = None;
    }

    pub fn enroll_calls(&self) -> usize {
        self.enroll_calls.load(Ordering::SeqCst)
    }

    pub fn config_calls(&self) -> usize {
        self.config_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// Every accepted log batch, in arrival order.
    pub fn published(&self) -> Vec<(PublishLogType, Vec<String>)> {
        self.state.lock().published.clone()
    }

    pub fn results(&self) -> Vec<DistributedResult> {
        self.state.lock().results.clone()
    }

    pub fn enrolled_details(&self) -> Vec<EnrollmentDetails> {
        self.state.lock().enrolled_details.clone()
    }

    fn check_key(&self, node_key: &str) -> Result<(), ClientError> {
        match &self.state.lock().current_key {
            Some(current) if current == node_key => Ok(()),
            _ => Err(ClientError::NodeInvalid(format!("unknown node key {node_key:?}"))),
        }
    }
}

#[async_trait]
impl ServerClient for MockServerClient {
    async fn request_enrollment(
        &self,
        enroll_secret: &str,
        _host_identifier: &str,
        details: &EnrollmentDetails,
    ) -> Result<String, ClientError> {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.reject_enrollment || enroll_secret.is_empty() {
            return Err(ClientError::NodeInvalid("invalid enroll secret".into()));
        }

        state.issued += 1;
        let issued = state.issued;
        let key = state
            .next_keys
            .pop_front()
            .unwrap_or_else(|| format!("nk{issued}"));
        state.current_key = Some(key.clone());
        state.enrolled_details.push(details.clone());
        Ok(key)
    }

    async fn request_config(&self, node_key: &str) -> Result<String, ClientError> {
        self.config_calls.fetch_add(1, Ordering::SeqCst);
        self.check_key(node_key)?;
        let state = self.state.lock();
        if state.fail_config {
            return Err(ClientError::Status {
                status: 503,
                message: "config unavailable".into(),
            });
        }
        Ok(state.config.clone())
    }

    async fn request_queries(
        &self,
        node_key: &str,
    ) -> Result<BTreeMap<String, String>, ClientError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check_key(node_key)?;
        Ok(self.state.lock().queries.clone())
    }

    async fn publish_logs(
        &self,
        node_key: &str,
        log_type: PublishLogType,
        logs: &[String],
    ) -> Result<PublishReceipt, ClientError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        self.check_key(node_key)?;
        let mut state = self.state.lock();
        if state.reject_publishes {
            return Err(ClientError::Status {
                status: 503,
                message: "log ingestion unavailable".into(),
            });
        }
        state.published.push((log_type, logs.to_vec()));
        Ok(PublishReceipt::default())
    }

    async fn publish_results(
        &self,
        node_key: &str,
        results: &[DistributedResult],
    ) -> Result<PublishReceipt, ClientError> {
        self.check_key(node_key)?;
        self.state.lock().results.extend_from_slice(results);
        Ok(PublishReceipt::default())
    }
}

/// A query runtime answering from a fixed table of SQL to rows. Unknown
/// SQL yields no rows.
#[derive(Debug, Default)]
pub struct StaticQuerier {
    rows: BTreeMap<String, Vec<Row>>,
    failing: Vec<String>,
    calls: AtomicUsize,
}

impl StaticQuerier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, sql: impl Into<String>, rows: Vec<Row>) -> Self {
        self.rows.insert(sql.into(), rows);
        self
    }

    /// Make `sql` fail as if the runtime rejected it.
    pub fn with_failure(mut self, sql: impl Into<String>) -> Self {
        self.failing.push(sql.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Querier for StaticQuerier {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|s| s == sql) {
            return Err(QueryError::Failed {
                status: "exit status: 1".into(),
                stderr: format!("Error: {sql}"),
            });
        }
        Ok(self.rows.get(sql).cloned().unwrap_or_default())
    }
}
