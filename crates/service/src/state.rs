use std::sync::Arc;

use super::android::AndroidService;
use super::config::Config;
use super::database::models::{AssetError, AssetKey, AssetName, ConfigAsset};
use super::database::{Database, DatabaseSetupError};
use super::provider::{AndroidProvider, ProviderError, ProxyProvider};

/// Main service state: the MDM database plus the Android service built on it.
#[derive(Clone, Debug)]
pub struct State {
    database: Database,
    android: Arc<AndroidService>,
}

impl State {
    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        let database = match &config.database_path {
            Some(path) => {
                tracing::info!(path = ?path, "opening MDM database");
                Database::connect(path).await?
            }
            None => {
                tracing::warn!("no database_path configured, using an in-memory database");
                Database::in_memory().await?
            }
        };

        let provider = Arc::new(ProxyProvider::new(config.provider_url.clone())?);
        Self::with_provider(database, provider, config).await
    }

    /// Build state around an existing database and provider. A server secret
    /// saved by an earlier signup is handed back to the provider.
    pub async fn with_provider(
        database: Database,
        provider: Arc<dyn AndroidProvider>,
        config: &Config,
    ) -> Result<Self, StateSetupError> {
        let asset_key = config
            .server_private_key
            .as_deref()
            .map(AssetKey::new)
            .transpose()?;

        match &asset_key {
            Some(key) => {
                if let Some(secret) =
                    ConfigAsset::get(AssetName::AndroidFleetServerSecret, key, &database).await?
                {
                    provider.set_authentication_secret(&String::from_utf8_lossy(&secret));
                }
            }
            None => tracing::warn!("no server_private_key configured, Android MDM is unavailable"),
        }

        let android = Arc::new(AndroidService::new(
            database.clone(),
            provider,
            config.server_url.clone(),
            config.allow_localhost_server_url,
            asset_key,
        ));

        Ok(Self { database, android })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn android(&self) -> &AndroidService {
        &self.android
    }
}

impl AsRef<Database> for State {
    fn as_ref(&self) -> &Database {
        &self.database
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("database setup error: {0}")]
    Database(#[from] DatabaseSetupError),

    #[error("database error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("config asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("provider setup error: {0}")]
    Provider(#[from] ProviderError),
}
