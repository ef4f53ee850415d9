//! Upstream Android management provider.
//!
//! The MDM flow never talks to the management API directly; it goes through
//! an [`AndroidProvider`], which is a proxy over HTTP in production and a
//! recording mock in tests.

mod proxy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use proxy::ProxyProvider;

/// Notifications the enterprise is subscribed to on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Enrollment,
    StatusReport,
    Command,
    UsageLogs,
}

impl NotificationType {
    pub const ALL: [NotificationType; 4] = [
        NotificationType::Enrollment,
        NotificationType::StatusReport,
        NotificationType::Command,
        NotificationType::UsageLogs,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupUrl {
    /// Resource name, `signupUrls/...`.
    pub name: String,
    /// URL the admin opens to bind a managed Google account.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterpriseRequest {
    pub signup_url_name: String,
    pub enterprise_token: String,
    pub pubsub_push_url: String,
    pub enabled_notification_types: Vec<NotificationType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEnterprise {
    /// Resource name, `enterprises/<id>`.
    pub name: String,
    /// Pub/sub topic, `projects/<p>/topics/<t>`; empty when none was created.
    #[serde(default)]
    pub topic_name: String,
    /// Secret the proxy expects as a bearer token from now on.
    #[serde(default)]
    pub fleet_server_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentTokenRequest {
    pub policy_name: String,
    pub additional_data: String,
    pub one_time_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentToken {
    #[serde(default)]
    pub name: String,
    pub value: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait AndroidProvider: Send + Sync {
    /// Create a signup URL that redirects to `callback_url` once the admin
    /// has bound an account.
    async fn signup_url_create(&self, callback_url: &str) -> Result<SignupUrl, ProviderError>;

    async fn enterprise_create(
        &self,
        request: &EnterpriseRequest,
    ) -> Result<CreatedEnterprise, ProviderError>;

    /// Delete `enterprises/<id>`.
    async fn enterprise_delete(&self, enterprise_name: &str) -> Result<(), ProviderError>;

    /// Resource names of every enterprise the upstream knows about.
    async fn enterprises_list(&self) -> Result<Vec<String>, ProviderError>;

    async fn policy_patch(&self, policy_name: &str, policy: &Value) -> Result<(), ProviderError>;

    async fn enrollment_token_create(
        &self,
        enterprise_name: &str,
        request: &EnrollmentTokenRequest,
    ) -> Result<EnrollmentToken, ProviderError>;

    /// Replace the credential used for subsequent calls. Empty clears it.
    fn set_authentication_secret(&self, secret: &str);
}

/// Policy installed on every new enterprise: report everything.
pub fn default_policy() -> Value {
    json!({
        "statusReportingSettings": {
            "applicationReportsEnabled": true,
            "deviceSettingsEnabled": true,
            "softwareInfoEnabled": true,
            "memoryInfoEnabled": true,
            "networkInfoEnabled": true,
            "displayInfoEnabled": true,
            "powerManagementEventsEnabled": true,
            "hardwareStatusEnabled": true,
            "systemPropertiesEnabled": true,
            "commonCriteriaModeEnabled": true
        }
    })
}

/// Last `/`-separated segment of a resource name.
pub fn short_id(resource_name: &str) -> &str {
    resource_name
        .rsplit('/')
        .next()
        .unwrap_or(resource_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("enterprises/LC02zw"), "LC02zw");
        assert_eq!(short_id("projects/p/topics/t-1"), "t-1");
        assert_eq!(short_id("bare"), "bare");
        assert_eq!(short_id(""), "");
    }

    #[test]
    fn test_default_policy_reports_everything() {
        let policy = default_policy();
        let settings = policy["statusReportingSettings"].as_object().unwrap();
        assert!(!settings.is_empty());
        assert!(settings.values().all(|v| v == &Value::Bool(true)));
    }

    #[test]
    fn test_notification_types_wire_names() {
        let encoded = serde_json::to_value(NotificationType::ALL).unwrap();
        assert_eq!(
            encoded,
            json!(["ENROLLMENT", "STATUS_REPORT", "COMMAND", "USAGE_LOGS"])
        );
    }
}
