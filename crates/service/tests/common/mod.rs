#![allow(dead_code)]

use std::sync::Arc;

use url::Url;

use service::android::AndroidService;
use service::database::models::{AssetKey, AssetName, ConfigAsset, Role, Session, User};
use service::testkit::MockProvider;
use service::{Config, Database, ServiceState};

pub const SERVER_URL: &str = "https://fleet.example.com";
pub const ADMIN_TOKEN: &str = "admin-session";
pub const OBSERVER_TOKEN: &str = "observer-session";
pub const PRIVATE_KEY: &str = "0123456789abcdef0123456789abcdef";

pub fn config(server_url: &str) -> Config {
    Config {
        server_url: Url::parse(server_url).unwrap(),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        database_path: None,
        provider_url: Url::parse("http://127.0.0.1:9").unwrap(),
        allow_localhost_server_url: false,
        server_private_key: Some(PRIVATE_KEY.to_string()),
        log_level: "info".to_string(),
        log_dir: None,
    }
}

pub async fn state_with(provider: Arc<MockProvider>, config: &Config) -> ServiceState {
    let db = Database::in_memory().await.unwrap();
    ServiceState::with_provider(db, provider, config).await.unwrap()
}

pub async fn state(provider: Arc<MockProvider>) -> ServiceState {
    state_with(provider, &config(SERVER_URL)).await
}

pub async fn admin(db: &Database) -> User {
    let user = User::create("Admin", "admin@example.com", Role::Admin, db)
        .await
        .unwrap();
    Session::create(user.id, ADMIN_TOKEN, db).await.unwrap();
    user
}

pub async fn observer(db: &Database) -> User {
    let user = User::create("Observer", "observer@example.com", Role::Observer, db)
        .await
        .unwrap();
    Session::create(user.id, OBSERVER_TOKEN, db).await.unwrap();
    user
}

/// Signup token the provider was asked to call back with, most recent first.
pub fn last_signup_token(provider: &MockProvider) -> String {
    let urls = provider.callback_urls();
    let url = urls.last().unwrap();
    url.rsplit('/').next().unwrap().to_string()
}

/// Decrypted value of a config asset.
pub async fn asset(name: AssetName, db: &Database) -> Option<Vec<u8>> {
    let key = AssetKey::new(PRIVATE_KEY).unwrap();
    ConfigAsset::get(name, &key, db).await.unwrap()
}

/// Config asset exactly as stored.
pub async fn raw_asset(name: AssetName, db: &Database) -> Vec<u8> {
    sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM mdm_config_assets WHERE name = ?1")
        .bind(name.as_str())
        .fetch_one(&**db)
        .await
        .unwrap()
}

pub async fn pubsub_token(db: &Database) -> String {
    let bytes = asset(AssetName::AndroidPubSubToken, db).await.unwrap();
    String::from_utf8(bytes).unwrap()
}

/// Run signup and callback so Android MDM ends up configured.
pub async fn configure(android: &AndroidService, provider: &MockProvider, user: &User) {
    android.enterprise_signup(user.id).await.unwrap();
    let token = last_signup_token(provider);
    android
        .enterprise_signup_callback(&token, "enterprise-token")
        .await
        .unwrap();
}
