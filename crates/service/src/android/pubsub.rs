use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{secrets_match, AndroidService};
use crate::database::models::{
    AndroidHost, AssetError, AssetName, ConfigAsset, EnrollSecret, NewAndroidHost,
};
use crate::provider::short_id;

const NOTIFICATION_TYPE: &str = "notificationType";
const APPLIED_STATE_DELETED: &str = "DELETED";

/// Body of a pub/sub push request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Base64 of the notification payload.
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message_id: String,
}

impl PushMessage {
    pub fn notification_type(&self) -> Option<&str> {
        self.attributes.get(NOTIFICATION_TYPE).map(String::as_str)
    }
}

/// The parts of an upstream device resource the receiver uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hardware_info: HardwareInfo,
    #[serde(default)]
    pub enrollment_token_data: String,
    #[serde(default)]
    pub applied_state: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInfo {
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub enterprise_specific_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct EnrollmentTokenData {
    #[serde(rename = "EnrollSecret", default)]
    enroll_secret: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("validation failed: Android MDM is NOT configured")]
    NotConfigured,

    #[error("Authentication failed")]
    AuthFailed,

    #[error("invalid notification data: {0}")]
    InvalidData(String),

    #[error("invalid enroll secret")]
    InvalidEnrollSecret,

    #[error("config asset: {0}")]
    Asset(#[from] AssetError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn decode_device(message: &PushMessage) -> Result<Device, PubSubError> {
    let bytes = STANDARD
        .decode(message.data.as_bytes())
        .map_err(|e| PubSubError::InvalidData(e.to_string()))?;
    let device: Device =
        serde_json::from_slice(&bytes).map_err(|e| PubSubError::InvalidData(e.to_string()))?;
    if device.hardware_info.enterprise_specific_id.is_empty() {
        return Err(PubSubError::InvalidData(
            "device has no enterpriseSpecificId".to_string(),
        ));
    }
    Ok(device)
}

impl AndroidService {
    /// Authenticate a push by its `token` query parameter and dispatch it by
    /// notification type.
    #[tracing::instrument(skip_all, fields(notification_type = ?message.notification_type()))]
    pub async fn process_pubsub_push(
        &self,
        token: Option<&str>,
        message: &PushMessage,
    ) -> Result<(), PubSubError> {
        if !self.is_configured().await? {
            return Err(PubSubError::NotConfigured);
        }

        let Some(key) = self.asset_key.as_ref() else {
            tracing::error!("no server_private_key configured, cannot verify pub/sub token");
            return Err(PubSubError::AuthFailed);
        };
        let expected = ConfigAsset::get(AssetName::AndroidPubSubToken, key, &self.db)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        let authorized = token.is_some_and(|token| secrets_match(token, &expected));
        if !authorized {
            tracing::warn!("rejected pub/sub push with a bad token");
            return Err(PubSubError::AuthFailed);
        }

        match message.notification_type() {
            Some("test") => tracing::debug!("received pub/sub test notification"),
            Some("ENROLLMENT") => self.handle_enrollment(message).await?,
            Some("STATUS_REPORT") => self.handle_status_report(message).await?,
            Some("COMMAND") => tracing::debug!("received command notification"),
            Some("USAGE_LOGS") => tracing::debug!("received usage logs notification"),
            other => tracing::debug!(notification_type = ?other, "ignoring notification"),
        }
        Ok(())
    }

    async fn handle_enrollment(&self, message: &PushMessage) -> Result<(), PubSubError> {
        let device = decode_device(message)?;

        let token_data: EnrollmentTokenData = serde_json::from_str(&device.enrollment_token_data)
            .map_err(|_| PubSubError::InvalidEnrollSecret)?;
        if !EnrollSecret::verify(&token_data.enroll_secret, &self.db).await? {
            return Err(PubSubError::InvalidEnrollSecret);
        }

        let info = device.hardware_info;
        let host = AndroidHost::upsert(
            &NewAndroidHost {
                enterprise_specific_id: info.enterprise_specific_id,
                device_id: short_id(&device.name).to_string(),
                serial_number: info.serial_number,
                model: info.model,
                brand: info.brand,
            },
            &self.db,
        )
        .await?;

        tracing::info!(host = host.id, device_id = %host.device_id, "android host enrolled");
        Ok(())
    }

    async fn handle_status_report(&self, message: &PushMessage) -> Result<(), PubSubError> {
        let device = decode_device(message)?;
        let unenroll = device.applied_state == APPLIED_STATE_DELETED;
        let reported_at = chrono::Utc::now().to_rfc3339();

        let known = AndroidHost::record_status_report(
            &device.hardware_info.enterprise_specific_id,
            &reported_at,
            unenroll,
            &self.db,
        )
        .await?;

        if !known {
            tracing::debug!(device = %device.name, "status report for unknown host");
        } else if unenroll {
            tracing::info!(device = %device.name, "android host unenrolled");
        }
        Ok(())
    }
}
