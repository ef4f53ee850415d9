use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::MissedTickBehavior;
use url::Host;

use super::{
    random_token, secrets_match, AndroidService, PUBSUB_PUSH_PATH, PUBSUB_TOKEN_BYTES,
    SIGNUP_CALLBACK_PATH, SIGNUP_TOKEN_BYTES,
};
use crate::database::models::{
    Activity, ActivityType, AndroidHost, AppConfig, AssetError, AssetKey, AssetName, ConfigAsset,
    EnrollSecret, Enterprise,
};
use crate::provider::{
    default_policy, short_id, EnrollmentTokenRequest, EnterpriseRequest, NotificationType,
    ProviderError, SignupUrl,
};

const ENROLLMENT_URL_BASE: &str = "https://enterprise.google.com/android/enroll";
const DEFAULT_POLICY_ID: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum EnterpriseError {
    #[error("Android MDM is already turned on")]
    AlreadyConfigured,

    #[error("Android Enterprise cannot be enabled with a localhost server URL")]
    LocalhostServerUrl,

    #[error("missing required private key: set server_private_key to turn on Android MDM")]
    MissingPrivateKey,

    #[error("enterpriseToken is required")]
    MissingEnterpriseToken,

    #[error("invalid signup token")]
    InvalidSignupToken,

    #[error("invalid enroll secret")]
    InvalidEnrollSecret,

    #[error("No enterprise found")]
    NotFound,

    #[error("Android Enterprise has been deleted")]
    DeletedUpstream,

    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        source: ProviderError,
    },

    #[error("generate token: {0}")]
    Random(getrandom::Error),

    #[error("config asset: {0}")]
    Asset(#[from] AssetError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EnterpriseError {
    fn upstream(context: &'static str) -> impl FnOnce(ProviderError) -> EnterpriseError {
        move |source| EnterpriseError::Upstream { context, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentTokenResponse {
    pub enrollment_token: String,
    pub enrollment_url: String,
}

fn policy_name(enterprise: &Enterprise) -> String {
    format!("{}/policies/{}", enterprise.name(), DEFAULT_POLICY_ID)
}

impl AndroidService {
    pub async fn is_configured(&self) -> Result<bool, sqlx::Error> {
        AppConfig::android_enabled_and_configured(&self.db).await
    }

    /// Resolve once Android MDM is enabled and configured, checking every
    /// `interval`. Never resolves if signup is not completed.
    pub async fn wait_until_configured(&self, interval: Duration) -> Result<(), sqlx::Error> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.is_configured().await? {
                return Ok(());
            }
        }
    }

    fn asset_key(&self) -> Result<&AssetKey, EnterpriseError> {
        self.asset_key.as_ref().ok_or(EnterpriseError::MissingPrivateKey)
    }

    fn check_server_url(&self) -> Result<(), EnterpriseError> {
        if self.allow_localhost_server_url {
            return Ok(());
        }
        let local = match self.server_url.host() {
            Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            None => true,
        };
        if local {
            return Err(EnterpriseError::LocalhostServerUrl);
        }
        Ok(())
    }

    /// Start a signup on behalf of `user_id` and return the upstream signup
    /// URL. Leaves a pending enterprise row keyed by a fresh signup token.
    #[tracing::instrument(skip(self))]
    pub async fn enterprise_signup(&self, user_id: i64) -> Result<SignupUrl, EnterpriseError> {
        if self.is_configured().await? {
            return Err(EnterpriseError::AlreadyConfigured);
        }
        self.asset_key()?;
        self.check_server_url()?;

        let signup_token = random_token(SIGNUP_TOKEN_BYTES).map_err(EnterpriseError::Random)?;
        let pending = Enterprise::create(user_id, &self.db).await?;
        let callback_url = format!(
            "{}/{}",
            self.server_endpoint(SIGNUP_CALLBACK_PATH),
            signup_token
        );

        let signup = match self.provider.signup_url_create(&callback_url).await {
            Ok(signup) => signup,
            Err(source) => {
                if let Err(e) = Enterprise::delete(pending.id, &self.db).await {
                    tracing::warn!(error = %e, row = pending.id, "failed to remove abandoned signup");
                }
                return Err(EnterpriseError::Upstream {
                    context: "create signup url",
                    source,
                });
            }
        };

        Enterprise::set_signup(pending.id, &signup.name, &signup_token, &self.db).await?;
        tracing::info!(row = pending.id, signup_name = %signup.name, "android enterprise signup started");
        Ok(signup)
    }

    /// Complete a signup. Only a request carrying the exact signup token of
    /// a pending row gets past the first checks; nothing is sent upstream
    /// before that.
    #[tracing::instrument(skip_all)]
    pub async fn enterprise_signup_callback(
        &self,
        signup_token: &str,
        enterprise_token: &str,
    ) -> Result<(), EnterpriseError> {
        if self.is_configured().await? {
            return Err(EnterpriseError::AlreadyConfigured);
        }

        let pending = Enterprise::list_pending(&self.db)
            .await?
            .into_iter()
            .find(|row| secrets_match(signup_token, &row.signup_token))
            .ok_or(EnterpriseError::InvalidSignupToken)?;

        if enterprise_token.is_empty() {
            return Err(EnterpriseError::MissingEnterpriseToken);
        }

        let key = self.asset_key()?;
        let pubsub_token = random_token(PUBSUB_TOKEN_BYTES).map_err(EnterpriseError::Random)?;
        ConfigAsset::put(
            AssetName::AndroidPubSubToken,
            pubsub_token.as_bytes(),
            key,
            &self.db,
        )
        .await?;

        let request = EnterpriseRequest {
            signup_url_name: pending.signup_name.clone(),
            enterprise_token: enterprise_token.to_string(),
            pubsub_push_url: format!(
                "{}?token={}",
                self.server_endpoint(PUBSUB_PUSH_PATH),
                pubsub_token
            ),
            enabled_notification_types: NotificationType::ALL.to_vec(),
        };
        let created = self
            .provider
            .enterprise_create(&request)
            .await
            .map_err(EnterpriseError::upstream("create enterprise"))?;

        let enterprise_id = short_id(&created.name);
        let topic_id = short_id(&created.topic_name);
        Enterprise::register(pending.id, enterprise_id, topic_id, &self.db).await?;

        if let Some(secret) = created.fleet_server_secret.as_deref().filter(|s| !s.is_empty()) {
            ConfigAsset::put(
                AssetName::AndroidFleetServerSecret,
                secret.as_bytes(),
                key,
                &self.db,
            )
            .await?;
            self.provider.set_authentication_secret(secret);
        }

        let removed = Enterprise::delete_others(pending.id, &self.db).await?;
        if removed > 0 {
            tracing::debug!(removed, "removed stale enterprise rows");
        }

        let enterprise = Enterprise::get(pending.id, &self.db)
            .await?
            .ok_or(EnterpriseError::NotFound)?;
        self.provider
            .policy_patch(&policy_name(&enterprise), &default_policy())
            .await
            .map_err(EnterpriseError::upstream("install default policy"))?;

        AppConfig::set_android_enabled_and_configured(true, &self.db).await?;
        Activity::create(
            Some(enterprise.user_id),
            ActivityType::EnabledAndroidMdm,
            &json!({}),
            &self.db,
        )
        .await?;

        tracing::info!(enterprise_id = %enterprise.enterprise_id, "android enterprise configured");
        Ok(())
    }

    /// The registered enterprise, verified to still exist upstream. An
    /// enterprise deleted upstream turns the feature off locally.
    #[tracing::instrument(skip(self))]
    pub async fn get_enterprise(&self) -> Result<Enterprise, EnterpriseError> {
        let enterprise = Enterprise::get_registered(&self.db)
            .await?
            .ok_or(EnterpriseError::NotFound)?;

        let names = self
            .provider
            .enterprises_list()
            .await
            .map_err(EnterpriseError::upstream("verifying enterprise with upstream"))?;

        let full_name = enterprise.name();
        let present = names
            .iter()
            .any(|name| *name == full_name || *name == enterprise.enterprise_id);
        if !present {
            tracing::warn!(enterprise_id = %enterprise.enterprise_id, "enterprise no longer exists upstream");
            if let Err(e) = AppConfig::set_android_enabled_and_configured(false, &self.db).await {
                tracing::error!(error = %e, "failed to turn off android after upstream delete");
            }
            if let Err(e) = AndroidHost::unenroll_all(&self.db).await {
                tracing::error!(error = %e, "failed to unenroll android hosts after upstream delete");
            }
            return Err(EnterpriseError::DeletedUpstream);
        }

        Ok(enterprise)
    }

    /// Turn Android MDM off. The upstream delete is best effort; local
    /// state is always cleared.
    #[tracing::instrument(skip(self))]
    pub async fn delete_enterprise(&self, user_id: i64) -> Result<(), EnterpriseError> {
        if let Some(enterprise) = Enterprise::get_registered(&self.db).await? {
            if let Err(e) = self.provider.enterprise_delete(&enterprise.name()).await {
                tracing::warn!(error = %e, enterprise_id = %enterprise.enterprise_id, "upstream enterprise delete failed");
            }
        }

        Enterprise::delete_all(&self.db).await?;
        AppConfig::set_android_enabled_and_configured(false, &self.db).await?;
        let unenrolled = AndroidHost::unenroll_all(&self.db).await?;
        Activity::create(
            Some(user_id),
            ActivityType::DisabledAndroidMdm,
            &json!({}),
            &self.db,
        )
        .await?;
        ConfigAsset::delete(
            &[
                AssetName::AndroidPubSubToken,
                AssetName::AndroidFleetServerSecret,
            ],
            &self.db,
        )
        .await?;
        self.provider.set_authentication_secret("");

        tracing::info!(unenrolled, "android enterprise removed");
        Ok(())
    }

    /// Issue a one-time device enrollment token for `enterprise_id`.
    #[tracing::instrument(skip(self, enroll_secret))]
    pub async fn enrollment_token(
        &self,
        enterprise_id: &str,
        enroll_secret: &str,
    ) -> Result<EnrollmentTokenResponse, EnterpriseError> {
        if !EnrollSecret::verify(enroll_secret, &self.db).await? {
            return Err(EnterpriseError::InvalidEnrollSecret);
        }
        if !self.is_configured().await? {
            return Err(EnterpriseError::NotFound);
        }
        let enterprise = Enterprise::get_registered(&self.db)
            .await?
            .filter(|e| e.enterprise_id == enterprise_id)
            .ok_or(EnterpriseError::NotFound)?;

        let request = EnrollmentTokenRequest {
            policy_name: policy_name(&enterprise),
            additional_data: json!({ "EnrollSecret": enroll_secret }).to_string(),
            one_time_only: true,
        };
        let token = self
            .provider
            .enrollment_token_create(&enterprise.name(), &request)
            .await
            .map_err(EnterpriseError::upstream("create enrollment token"))?;

        Ok(EnrollmentTokenResponse {
            enrollment_url: format!("{}?et={}", ENROLLMENT_URL_BASE, token.value),
            enrollment_token: token.value,
        })
    }
}
