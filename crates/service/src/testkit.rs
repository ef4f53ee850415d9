//! In-process stand-ins for the upstream provider.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::provider::{
    AndroidProvider, CreatedEnterprise, EnrollmentToken, EnrollmentTokenRequest,
    EnterpriseRequest, ProviderError, SignupUrl,
};

pub const MOCK_SIGNUP_NAME: &str = "signupUrls/C97372c9c4d7a9d1";
pub const MOCK_ENTERPRISE_NAME: &str = "enterprises/LC02zw8mx1";
pub const MOCK_TOPIC_NAME: &str = "projects/beacon-mdm/topics/android-LC02zw8mx1";
pub const MOCK_SERVER_SECRET: &str = "fleet-server-secret";

#[derive(Debug, Default)]
struct MockState {
    callback_urls: Vec<String>,
    created: Vec<EnterpriseRequest>,
    deleted: Vec<String>,
    policies: Vec<(String, Value)>,
    token_requests: Vec<(String, EnrollmentTokenRequest)>,
    upstream_enterprises: Vec<String>,
    secret: Option<String>,
    fail_signup: bool,
    fail_create: bool,
    fail_policy: bool,
    fail_list: bool,
    fail_delete: bool,
}

/// Provider that records every call and keeps a list of the enterprises it
/// has "created" so that verification against the list behaves like the
/// real upstream.
#[derive(Debug, Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
    signup_calls: AtomicUsize,
    create_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

fn unavailable() -> ProviderError {
    ProviderError::Status {
        status: 503,
        message: "upstream unavailable".to_string(),
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_signup(&self, fail: bool) {
        self.state.lock().fail_signup = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }

    pub fn fail_policy(&self, fail: bool) {
        self.state.lock().fail_policy = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    pub fn fail_delete(&self, fail: bool) {
        self.state.lock().fail_delete = fail;
    }

    /// Drop an enterprise upstream without telling the service.
    pub fn forget_enterprise(&self, name: &str) {
        self.state.lock().upstream_enterprises.retain(|n| n != name);
    }

    pub fn signup_calls(&self) -> usize {
        self.signup_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn callback_urls(&self) -> Vec<String> {
        self.state.lock().callback_urls.clone()
    }

    pub fn created(&self) -> Vec<EnterpriseRequest> {
        self.state.lock().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn policies(&self) -> Vec<(String, Value)> {
        self.state.lock().policies.clone()
    }

    pub fn token_requests(&self) -> Vec<(String, EnrollmentTokenRequest)> {
        self.state.lock().token_requests.clone()
    }

    pub fn secret(&self) -> Option<String> {
        self.state.lock().secret.clone()
    }
}

#[async_trait]
impl AndroidProvider for MockProvider {
    async fn signup_url_create(&self, callback_url: &str) -> Result<SignupUrl, ProviderError> {
        self.signup_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.fail_signup {
            return Err(unavailable());
        }
        state.callback_urls.push(callback_url.to_string());
        Ok(SignupUrl {
            name: MOCK_SIGNUP_NAME.to_string(),
            url: format!("https://play.google.com/work/adminsignup?token={MOCK_SIGNUP_NAME}"),
        })
    }

    async fn enterprise_create(
        &self,
        request: &EnterpriseRequest,
    ) -> Result<CreatedEnterprise, ProviderError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(unavailable());
        }
        state.created.push(request.clone());
        state.upstream_enterprises.push(MOCK_ENTERPRISE_NAME.to_string());
        Ok(CreatedEnterprise {
            name: MOCK_ENTERPRISE_NAME.to_string(),
            topic_name: MOCK_TOPIC_NAME.to_string(),
            fleet_server_secret: Some(MOCK_SERVER_SECRET.to_string()),
        })
    }

    async fn enterprise_delete(&self, enterprise_name: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        if state.fail_delete {
            return Err(unavailable());
        }
        state.deleted.push(enterprise_name.to_string());
        state.upstream_enterprises.retain(|n| n != enterprise_name);
        Ok(())
    }

    async fn enterprises_list(&self) -> Result<Vec<String>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.fail_list {
            return Err(unavailable());
        }
        Ok(state.upstream_enterprises.clone())
    }

    async fn policy_patch(&self, policy_name: &str, policy: &Value) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        if state.fail_policy {
            return Err(unavailable());
        }
        state.policies.push((policy_name.to_string(), policy.clone()));
        Ok(())
    }

    async fn enrollment_token_create(
        &self,
        enterprise_name: &str,
        request: &EnrollmentTokenRequest,
    ) -> Result<EnrollmentToken, ProviderError> {
        let mut state = self.state.lock();
        state
            .token_requests
            .push((enterprise_name.to_string(), request.clone()));
        let n = state.token_requests.len();
        Ok(EnrollmentToken {
            name: format!("{enterprise_name}/enrollmentTokens/{n}"),
            value: format!("et-{n}"),
        })
    }

    fn set_authentication_secret(&self, secret: &str) {
        self.state.lock().secret = (!secret.is_empty()).then(|| secret.to_string());
    }
}
