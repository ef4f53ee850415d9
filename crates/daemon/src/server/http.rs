use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{
    ClientError, DistributedResult, EnrollmentDetails, PublishLogType, PublishReceipt, Row,
    ServerClient,
};

const ENROLL_PATH: &str = "/api/v1/osquery/enroll";
const CONFIG_PATH: &str = "/api/v1/osquery/config";
const DISTRIBUTED_READ_PATH: &str = "/api/v1/osquery/distributed/read";
const DISTRIBUTED_WRITE_PATH: &str = "/api/v1/osquery/distributed/write";
const LOG_PATH: &str = "/api/v1/osquery/log";

/// JSON-over-HTTPS client for the osquery remote API of the management server.
#[derive(Debug, Clone)]
pub struct HttpServerClient {
    base_url: Url,
    http: Client,
}

impl HttpServerClient {
    pub fn new(
        base_url: Url,
        timeout: Duration,
        insecure_skip_verify: bool,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// POST `body` and return the raw response text once the server has
    /// accepted the node key.
    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String, ClientError> {
        let url = self.base_url.join(path)?;
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let reply = serde_json::from_str::<Reply>(&text).ok();
        let message = reply
            .as_ref()
            .and_then(|r| r.error.clone())
            .unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED || reply.as_ref().is_some_and(|r| r.node_invalid) {
            let message = if message.is_empty() {
                status.to_string()
            } else {
                message
            };
            return Err(ClientError::NodeInvalid(message));
        }

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: if message.is_empty() { text } else { message },
            });
        }

        Ok(text)
    }

    fn receipt(text: &str) -> PublishReceipt {
        let reply = serde_json::from_str::<Reply>(text).unwrap_or_default();
        PublishReceipt {
            message: reply.error.unwrap_or_default(),
            node_id: reply.node_id.unwrap_or_default(),
        }
    }
}

/// Fields the server may attach to any response.
#[derive(Debug, Default, Deserialize)]
struct Reply {
    #[serde(default)]
    node_invalid: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    node_id: Option<String>,
}

#[derive(Serialize)]
struct EnrollRequest<'a> {
    enroll_secret: &'a str,
    host_identifier: &'a str,
    host_details: BTreeMap<&'static str, BTreeMap<&'static str, &'a str>>,
}

#[derive(Deserialize)]
struct EnrollResponse {
    #[serde(default)]
    node_key: String,
}

#[derive(Serialize)]
struct NodeKeyRequest<'a> {
    node_key: &'a str,
}

#[derive(Deserialize)]
struct DistributedReadResponse {
    #[serde(default)]
    queries: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct DistributedWriteRequest<'a> {
    node_key: &'a str,
    queries: BTreeMap<&'a str, &'a [Row]>,
    statuses: BTreeMap<&'a str, i32>,
    messages: BTreeMap<&'a str, &'a str>,
}

#[derive(Serialize)]
struct LogRequest<'a> {
    node_key: &'a str,
    log_type: PublishLogType,
    data: Vec<Value>,
}

fn host_details(details: &EnrollmentDetails) -> BTreeMap<&'static str, BTreeMap<&'static str, &str>> {
    BTreeMap::from([
        (
            "os_version",
            BTreeMap::from([
                ("version", details.os_version.as_str()),
                ("build", details.os_build.as_str()),
                ("name", details.os_name.as_str()),
                ("platform", details.os_platform.as_str()),
                ("platform_like", details.os_platform_like.as_str()),
            ]),
        ),
        (
            "osquery_info",
            BTreeMap::from([("version", details.osquery_version.as_str())]),
        ),
        (
            "system_info",
            BTreeMap::from([
                ("hardware_model", details.hardware_model.as_str()),
                ("hardware_serial", details.hardware_serial.as_str()),
                ("hardware_vendor", details.hardware_vendor.as_str()),
                ("hostname", details.hostname.as_str()),
                ("uuid", details.hardware_uuid.as_str()),
            ]),
        ),
        (
            "agent",
            BTreeMap::from([
                ("version", details.agent_version.as_str()),
                ("os", details.os_family.as_str()),
                ("arch", details.architecture.as_str()),
            ]),
        ),
    ])
}

/// Lines holding a JSON object or array go over the wire as JSON, anything
/// else (scalars included) as a string.
fn log_value(line: &str) -> Value {
    match serde_json::from_str::<Value>(line) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(line.to_string()),
    }
}

#[async_trait]
impl ServerClient for HttpServerClient {
    async fn request_enrollment(
        &self,
        enroll_secret: &str,
        host_identifier: &str,
        details: &EnrollmentDetails,
    ) -> Result<String, ClientError> {
        let body = EnrollRequest {
            enroll_secret,
            host_identifier,
            host_details: host_details(details),
        };
        let text = self.post(ENROLL_PATH, &body).await?;
        let response: EnrollResponse =
            serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(response.node_key)
    }

    async fn request_config(&self, node_key: &str) -> Result<String, ClientError> {
        self.post(CONFIG_PATH, &NodeKeyRequest { node_key }).await
    }

    async fn request_queries(
        &self,
        node_key: &str,
    ) -> Result<BTreeMap<String, String>, ClientError> {
        let text = self
            .post(DISTRIBUTED_READ_PATH, &NodeKeyRequest { node_key })
            .await?;
        let response: DistributedReadResponse =
            serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(response.queries)
    }

    async fn publish_logs(
        &self,
        node_key: &str,
        log_type: PublishLogType,
        logs: &[String],
    ) -> Result<PublishReceipt, ClientError> {
        let data = logs.iter().map(|line| log_value(line)).collect();
        let body = LogRequest {
            node_key,
            log_type,
            data,
        };
        let text = self.post(LOG_PATH, &body).await?;
        Ok(Self::receipt(&text))
    }

    async fn publish_results(
        &self,
        node_key: &str,
        results: &[DistributedResult],
    ) -> Result<PublishReceipt, ClientError> {
        let mut body = DistributedWriteRequest {
            node_key,
            queries: BTreeMap::new(),
            statuses: BTreeMap::new(),
            messages: BTreeMap::new(),
        };
        for result in results {
            body.queries
                .insert(result.query_name.as_str(), result.rows.as_slice());
            body.statuses.insert(result.query_name.as_str(), result.status);
        }

        let text = self.post(DISTRIBUTED_WRITE_PATH, &body).await?;
        Ok(Self::receipt(&text))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn client(server: &MockServer) -> HttpServerClient {
        let base = Url::parse(&server.base_url()).unwrap();
        HttpServerClient::new(base, Duration::from_secs(5), false).unwrap()
    }

    #[tokio::test]
    async fn test_enrollment_returns_node_key() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(ENROLL_PATH)
                    .body_contains("\"enroll_secret\":\"s3cret\"")
                    .body_contains("\"host_identifier\":\"host-1\"")
                    .body_contains("\"hostname\":\"box\"");
                then.status(200).json_body(json!({"node_key": "nk1"}));
            })
            .await;

        let details = EnrollmentDetails {
            hostname: "box".into(),
            ..Default::default()
        };
        let key = client(&server)
            .request_enrollment("s3cret", "host-1", &details)
            .await
            .unwrap();

        assert_eq!(key, "nk1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_node_invalid_flag_and_unauthorized_are_equivalent() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(CONFIG_PATH);
                then.status(200)
                    .json_body(json!({"node_invalid": true, "error": "invalid node key"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(DISTRIBUTED_READ_PATH);
                then.status(401).body("unauthorized");
            })
            .await;

        let client = client(&server);
        let err = client.request_config("stale").await.unwrap_err();
        assert!(err.is_node_invalid());
        assert_eq!(err.to_string(), "node invalid: invalid node key");

        let err = client.request_queries("stale").await.unwrap_err();
        assert!(err.is_node_invalid());
    }

    #[tokio::test]
    async fn test_server_errors_are_not_node_invalid() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(LOG_PATH);
                then.status(500).json_body(json!({"error": "db down"}));
            })
            .await;

        let err = client(&server)
            .publish_logs("nk1", PublishLogType::Status, &["line".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Status { status: 500, ref message } if message == "db down"));
    }

    #[tokio::test]
    async fn test_publish_logs_sends_json_lines_as_json() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(LOG_PATH).json_body(json!({
                    "node_key": "nk1",
                    "log_type": "result",
                    "data": [{"name": "pack:x:y"}, "plain text"]
                }));
                then.status(200).json_body(json!({"node_id": "42"}));
            })
            .await;

        let receipt = client(&server)
            .publish_logs(
                "nk1",
                PublishLogType::Result,
                &[r#"{"name":"pack:x:y"}"#.to_string(), "plain text".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(receipt.node_id, "42");
        mock.assert_async().await;
    }

    #[test]
    fn test_scalar_lines_stay_strings() {
        assert_eq!(log_value("123"), json!("123"));
        assert_eq!(log_value("true"), json!("true"));
        assert_eq!(log_value("null"), json!("null"));
        assert_eq!(log_value(r#""quoted""#), json!(r#""quoted""#));
        assert_eq!(log_value("[1,2]"), json!([1, 2]));
        assert_eq!(log_value(r#"{"a":1}"#), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_publish_logs_keeps_scalar_lines_as_strings() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(LOG_PATH).json_body(json!({
                    "node_key": "nk1",
                    "log_type": "status",
                    "data": ["123", "true", {"severity": "0"}]
                }));
                then.status(200).json_body(json!({"node_id": "7"}));
            })
            .await;

        client(&server)
            .publish_logs(
                "nk1",
                PublishLogType::Status,
                &[
                    "123".to_string(),
                    "true".to_string(),
                    r#"{"severity":"0"}"#.to_string(),
                ],
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_distributed_roundtrip() {
        if !can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(DISTRIBUTED_READ_PATH);
                then.status(200)
                    .json_body(json!({"queries": {"q1": "SELECT 1"}, "accelerate": 0}));
            })
            .await;
        let write = server
            .mock_async(|when, then| {
                when.method(POST).path(DISTRIBUTED_WRITE_PATH).json_body(json!({
                    "node_key": "nk1",
                    "queries": {"q1": [{"1": "1"}]},
                    "statuses": {"q1": 0},
                    "messages": {}
                }));
                then.status(200).json_body(json!({}));
            })
            .await;

        let client = client(&server);
        let queries = client.request_queries("nk1").await.unwrap();
        assert_eq!(queries.get("q1").map(String::as_str), Some("SELECT 1"));

        let result = DistributedResult {
            query_name: "q1".into(),
            status: 0,
            rows: vec![Row::from([("1".to_string(), "1".to_string())])],
        };
        client.publish_results("nk1", &[result]).await.unwrap();
        write.assert_async().await;
    }
}
