mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;

use ::common::kv::{Bucket, Store};
use beacon_daemon::enroll::{
    AgentError, EnrollError, Enrollment, CONFIG_KEY, FINGERPRINT_QUERY, NODE_KEY_KEY,
};
use beacon_daemon::server::{DistributedResult, PublishLogType, Row};
use beacon_daemon::testkit::{MockServerClient, StaticQuerier};

const KOLIDE_CONFIG: &str = r#"{
    "packs": {
        "pack_kolide_details": {
            "queries": {"hostname": {"query": "SELECT hostname FROM system_info;"}}
        },
        "kolide_extras": {
            "queries": {"uptime": {"query": "SELECT total_seconds FROM uptime;"}}
        }
    }
}"#;

#[tokio::test]
async fn test_first_boot_enrollment() {
    let store = Store::in_memory().await.unwrap();
    let server = Arc::new(MockServerClient::new());
    let enrollment = common::enrollment(&store, server.clone(), None).await;

    assert_eq!(enrollment.enroll().await.unwrap(), "nk1");
    assert_eq!(
        store.get(Bucket::Config, NODE_KEY_KEY).await.unwrap().unwrap(),
        b"nk1"
    );
    assert_eq!(server.enroll_calls(), 1);

    // already holding a key, no second request
    assert_eq!(enrollment.enroll().await.unwrap(), "nk1");
    assert_eq!(server.enroll_calls(), 1);
}

#[tokio::test]
async fn test_cached_node_key_on_restart() {
    let store = Store::in_memory().await.unwrap();
    store.put(Bucket::Config, NODE_KEY_KEY, b"nk1").await.unwrap();
    let server = Arc::new(MockServerClient::new().with_current_key("nk1"));

    let enrollment = common::enrollment(&store, server.clone(), None).await;
    assert_eq!(enrollment.node_key(), "nk1");
    assert_eq!(enrollment.enroll().await.unwrap(), "nk1");
    assert_eq!(server.enroll_calls(), 0);
}

#[tokio::test]
async fn test_invalid_node_key_reenrolls_once_for_config() {
    let store = Store::in_memory().await.unwrap();
    store.put(Bucket::Config, NODE_KEY_KEY, b"nk1").await.unwrap();
    let server = Arc::new(
        MockServerClient::new()
            .with_node_keys(["nk2"])
            .with_config(r#"{"options":{}}"#),
    );
    let enrollment = common::enrollment(&store, server.clone(), None).await;

    let configs = enrollment.generate_configs().await.unwrap();
    assert_eq!(configs["config"], r#"{"options":{}}"#);
    assert_eq!(enrollment.node_key(), "nk2");
    assert_eq!(server.config_calls(), 2);
    assert_eq!(server.enroll_calls(), 1);
    assert_eq!(
        store.get(Bucket::Config, CONFIG_KEY).await.unwrap().unwrap(),
        br#"{"options":{}}"#
    );
}

#[tokio::test]
async fn test_rejected_reenrollment_is_surfaced_without_retry() {
    let store = Store::in_memory().await.unwrap();
    store.put(Bucket::Config, NODE_KEY_KEY, b"stale").await.unwrap();
    let server = Arc::new(MockServerClient::new());
    server.reject_enrollment(true);
    let enrollment = common::enrollment(&store, server.clone(), None).await;

    let err = enrollment.generate_configs().await.unwrap_err();
    assert!(matches!(err, AgentError::ReenrollmentInvalid));
    assert_eq!(err.to_string(), "enrollment invalid, reenrollment invalid");
    assert_eq!(server.config_calls(), 1);
    assert_eq!(server.enroll_calls(), 1);
}

#[tokio::test]
async fn test_config_falls_back_to_cache() {
    let store = Store::in_memory().await.unwrap();
    let server = Arc::new(MockServerClient::new().with_config(r#"{"decorators":{}}"#));
    let enrollment = common::enrollment(&store, server.clone(), None).await;

    enrollment.generate_configs().await.unwrap();
    server.fail_config(true);

    let configs = enrollment.generate_configs().await.unwrap();
    assert_eq!(configs["config"], r#"{"decorators":{}}"#);
}

#[tokio::test]
async fn test_config_failure_without_cache_is_an_error() {
    let store = Store::in_memory().await.unwrap();
    let server = Arc::new(MockServerClient::new());
    server.fail_config(true);
    let enrollment = common::enrollment(&store, server.clone(), None).await;

    let err = enrollment.generate_configs().await.unwrap_err();
    assert!(matches!(err, AgentError::Transport { op: "request config", .. }));
}

#[tokio::test]
async fn test_empty_secret_is_rejected() {
    let store = Store::in_memory().await.unwrap();
    let result = Enrollment::new(
        store,
        Arc::new(MockServerClient::new()),
        None,
        "",
        common::fast_options(),
    )
    .await;
    assert!(matches!(result, Err(EnrollError::EmptySecret)));
}

#[tokio::test]
async fn test_concurrent_enrollments_share_one_request() {
    let store = Store::in_memory().await.unwrap();
    let server = Arc::new(MockServerClient::new());
    let enrollment = common::enrollment(&store, server.clone(), None).await;

    let keys = join_all((0..8).map(|_| {
        let enrollment = enrollment.clone();
        async move { enrollment.enroll().await.unwrap() }
    }))
    .await;

    assert!(keys.iter().all(|k| k == "nk1"));
    assert_eq!(server.enroll_calls(), 1);
}

#[tokio::test]
async fn test_require_reenroll_forgets_key() {
    let store = Store::in_memory().await.unwrap();
    let server = Arc::new(MockServerClient::new());
    let enrollment = common::enrollment(&store, server.clone(), None).await;

    enrollment.enroll().await.unwrap();
    enrollment.require_reenroll().await.unwrap();
    assert!(enrollment.node_key().is_empty());
    assert!(store.get(Bucket::Config, NODE_KEY_KEY).await.unwrap().is_none());

    assert_eq!(enrollment.enroll().await.unwrap(), "nk2");
    assert_eq!(server.enroll_calls(), 2);
}

#[tokio::test]
async fn test_enrollment_sends_queried_details() {
    let store = Store::in_memory().await.unwrap();
    let server = Arc::new(MockServerClient::new());
    let querier = Arc::new(StaticQuerier::new().with_rows(
        FINGERPRINT_QUERY,
        vec![Row::from([
            ("hostname".to_string(), "build-07".to_string()),
            ("hardware_serial".to_string(), "C02XYZ".to_string()),
        ])],
    ));
    let enrollment = common::enrollment(&store, server.clone(), Some(querier)).await;

    enrollment.enroll().await.unwrap();
    let details = server.enrolled_details();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].hostname, "build-07");
    assert_eq!(details[0].hardware_serial, "C02XYZ");
    assert_eq!(details[0].architecture, std::env::consts::ARCH);
}

#[tokio::test]
async fn test_distributed_queries_reenroll_on_invalid_key() {
    let store = Store::in_memory().await.unwrap();
    let queries = BTreeMap::from([("q1".to_string(), "SELECT 1;".to_string())]);
    let server = Arc::new(MockServerClient::new().with_queries(queries.clone()));
    let enrollment = common::enrollment(&store, server.clone(), None).await;

    enrollment.enroll().await.unwrap();
    server.invalidate_node_key();
    assert_eq!(enrollment.get_queries().await.unwrap(), queries);
    assert_eq!(server.enroll_calls(), 2);

    server.invalidate_node_key();
    let result = DistributedResult {
        query_name: "q1".to_string(),
        status: 0,
        rows: vec![Row::from([("1".to_string(), "1".to_string())])],
    };
    enrollment.write_results(&[result.clone()]).await.unwrap();
    assert_eq!(server.results(), vec![result]);
    assert_eq!(server.enroll_calls(), 3);
}

#[tokio::test]
async fn test_new_config_replays_marker_pack_queries() {
    let store = Store::in_memory().await.unwrap();
    let server = Arc::new(MockServerClient::new().with_config(KOLIDE_CONFIG));
    let querier = Arc::new(
        StaticQuerier::new()
            .with_rows(
                "SELECT hostname FROM system_info;",
                vec![Row::from([("hostname".to_string(), "build-07".to_string())])],
            )
            .with_rows(
                "SELECT total_seconds FROM uptime;",
                vec![Row::from([("total_seconds".to_string(), "42".to_string())])],
            ),
    );
    let enrollment = common::enrollment(&store, server.clone(), Some(querier.clone())).await;
    let host_identifier = enrollment.identity().host_identifier().await.unwrap();

    enrollment.generate_configs().await.unwrap();

    let published = server.published();
    assert_eq!(published.len(), 1);
    let (log_type, lines) = &published[0];
    assert_eq!(*log_type, PublishLogType::Result);
    let envelope: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(envelope["name"], "pack:pack_kolide_details:hostname");
    assert_eq!(envelope["hostIdentifier"], host_identifier.as_str());
    // `kolide_extras` lacks the leading underscore of the marker
    assert_eq!(lines.len(), 1);
    assert!(lines.iter().all(|line| !line.contains("kolide_extras")));
    assert_eq!(store.bucket_count(Bucket::InitialResults).await.unwrap(), 1);

    // the same config does not replay again
    enrollment.generate_configs().await.unwrap();
    assert_eq!(server.published().len(), 1);
}
