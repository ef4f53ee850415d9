use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{
    AndroidProvider, CreatedEnterprise, EnrollmentToken, EnrollmentTokenRequest,
    EnterpriseRequest, ProviderError, SignupUrl,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to the Android management API through an HTTP proxy that holds the
/// upstream service credentials.
#[derive(Debug)]
pub struct ProxyProvider {
    base_url: Url,
    http: Client,
    secret: RwLock<Option<String>>,
}

impl ProxyProvider {
    pub fn new(base_url: Url) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url,
            http,
            secret: RwLock::new(None),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        let url = self.base_url.join(path)?;
        let builder = self.http.request(method, url);
        Ok(match self.secret.read().as_deref() {
            Some(secret) => builder.bearer_auth(secret),
            None => builder,
        })
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ProviderError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignupUrlRequest<'a> {
    callback_url: &'a str,
}

#[derive(Deserialize)]
struct EnterpriseList {
    #[serde(default)]
    enterprises: Vec<EnterpriseName>,
}

#[derive(Deserialize)]
struct EnterpriseName {
    name: String,
}

#[async_trait]
impl AndroidProvider for ProxyProvider {
    async fn signup_url_create(&self, callback_url: &str) -> Result<SignupUrl, ProviderError> {
        let builder = self
            .request(Method::POST, "/v1/signupUrls")?
            .json(&SignupUrlRequest { callback_url });
        Ok(Self::send(builder).await?.json().await?)
    }

    async fn enterprise_create(
        &self,
        request: &EnterpriseRequest,
    ) -> Result<CreatedEnterprise, ProviderError> {
        let builder = self.request(Method::POST, "/v1/enterprises")?.json(request);
        Ok(Self::send(builder).await?.json().await?)
    }

    async fn enterprise_delete(&self, enterprise_name: &str) -> Result<(), ProviderError> {
        let builder = self.request(Method::DELETE, &format!("/v1/{enterprise_name}"))?;
        Self::send(builder).await?;
        Ok(())
    }

    async fn enterprises_list(&self) -> Result<Vec<String>, ProviderError> {
        let builder = self.request(Method::GET, "/v1/enterprises")?;
        let list: EnterpriseList = Self::send(builder).await?.json().await?;
        Ok(list.enterprises.into_iter().map(|e| e.name).collect())
    }

    async fn policy_patch(&self, policy_name: &str, policy: &Value) -> Result<(), ProviderError> {
        let builder = self
            .request(Method::PATCH, &format!("/v1/{policy_name}"))?
            .json(policy);
        Self::send(builder).await?;
        Ok(())
    }

    async fn enrollment_token_create(
        &self,
        enterprise_name: &str,
        request: &EnrollmentTokenRequest,
    ) -> Result<EnrollmentToken, ProviderError> {
        let builder = self
            .request(Method::POST, &format!("/v1/{enterprise_name}/enrollmentTokens"))?
            .json(request);
        Ok(Self::send(builder).await?.json().await?)
    }

    fn set_authentication_secret(&self, secret: &str) {
        let mut current = self.secret.write();
        *current = (!secret.is_empty()).then(|| secret.to_string());
    }
}
