//! Shared fixtures for agent integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use beacon_daemon::enroll::{EnrollOptions, Enrollment};
use beacon_daemon::logbuf::{LogBuffer, LogBufferConfig};
use beacon_daemon::querier::Querier;
use beacon_daemon::testkit::{MockServerClient, StaticQuerier};
use beacon_daemon::{ServiceConfig, ServiceState};
use common::kv::Store;

pub const SECRET: &str = "enroll-s3cret";

/// Enrollment options that give up on host details quickly.
pub fn fast_options() -> EnrollOptions {
    EnrollOptions {
        details_required: false,
        skip_details: false,
        details_timeout: Duration::from_millis(20),
        details_interval: Duration::from_millis(5),
        run_initial_queries: true,
    }
}

pub async fn enrollment(
    store: &Store,
    server: Arc<MockServerClient>,
    querier: Option<Arc<StaticQuerier>>,
) -> Arc<Enrollment> {
    let querier = querier.map(|q| q as Arc<dyn Querier>);
    Arc::new(
        Enrollment::new(store.clone(), server, querier, SECRET, fast_options())
            .await
            .unwrap(),
    )
}

/// A log buffer over an in-memory store whose server has already enrolled
/// this host.
pub async fn log_buffer(config: LogBufferConfig) -> (LogBuffer, Store, Arc<MockServerClient>) {
    let store = Store::in_memory().await.unwrap();
    let server = Arc::new(MockServerClient::new());
    let enrollment = enrollment(&store, server.clone(), None).await;
    enrollment.enroll().await.unwrap();
    (LogBuffer::new(store.clone(), enrollment, config), store, server)
}

pub fn service_config() -> ServiceConfig {
    ServiceConfig {
        server_url: "https://fleet.example.com".to_string(),
        enroll_secret: SECRET.to_string(),
        request_timeout: Duration::from_secs(5),
        insecure_skip_verify: false,
        api_port: 0,
        store_path: None,
        log_buffer: LogBufferConfig::default(),
        enroll: fast_options(),
        osqueryi_path: None,
        log_level: tracing::Level::DEBUG,
        log_dir: None,
    }
}

/// Agent state over an in-memory store and the given fakes.
pub async fn service_state(
    server: Arc<MockServerClient>,
    querier: Option<Arc<StaticQuerier>>,
) -> ServiceState {
    let store = Store::in_memory().await.unwrap();
    let querier = querier.map(|q| q as Arc<dyn Querier>);
    ServiceState::with_collaborators(store, server, querier, &service_config())
        .await
        .unwrap()
}
