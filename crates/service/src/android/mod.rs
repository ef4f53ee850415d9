//! Android enterprise MDM.
//!
//! `enterprise` drives the single-enterprise signup state machine against
//! the upstream provider. `pubsub` authenticates and dispatches inbound
//! push notifications.

mod enterprise;
mod pubsub;

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use subtle::ConstantTimeEq;
use url::Url;

use crate::database::models::AssetKey;
use crate::database::Database;
use crate::provider::AndroidProvider;

pub use enterprise::{EnrollmentTokenResponse, EnterpriseError};
pub use pubsub::{Device, HardwareInfo, PubSubError, PushEnvelope, PushMessage};

/// Signup tokens carry 32 random bytes.
pub const SIGNUP_TOKEN_BYTES: usize = 32;
/// Pub/sub tokens carry 64 random bytes.
pub const PUBSUB_TOKEN_BYTES: usize = 64;

pub const SIGNUP_CALLBACK_PATH: &str = "/api/v1/fleet/android_enterprise/connect";
pub const PUBSUB_PUSH_PATH: &str = "/api/v1/fleet/android_enterprise/pubsub";

#[derive(Clone)]
pub struct AndroidService {
    db: Database,
    provider: Arc<dyn AndroidProvider>,
    server_url: Url,
    allow_localhost_server_url: bool,
    asset_key: Option<AssetKey>,
}

impl std::fmt::Debug for AndroidService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AndroidService")
            .field("server_url", &self.server_url.as_str())
            .field("allow_localhost_server_url", &self.allow_localhost_server_url)
            .field("has_asset_key", &self.asset_key.is_some())
            .finish()
    }
}

impl AndroidService {
    pub fn new(
        db: Database,
        provider: Arc<dyn AndroidProvider>,
        server_url: Url,
        allow_localhost_server_url: bool,
        asset_key: Option<AssetKey>,
    ) -> Self {
        Self {
            db,
            provider,
            server_url,
            allow_localhost_server_url,
            asset_key,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn provider(&self) -> &Arc<dyn AndroidProvider> {
        &self.provider
    }

    /// `<server_url><path>` with any trailing slash on the server URL removed.
    fn server_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url.as_str().trim_end_matches('/'), path)
    }
}

/// URL-safe random token encoding `len` bytes from the OS generator.
pub fn random_token(len: usize) -> Result<String, getrandom::Error> {
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Constant-time string comparison for secrets received over the wire.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}
