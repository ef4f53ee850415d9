//! Small secrets the MDM flow keeps outside the enterprise row.
//!
//! Values are sealed with AES-256-GCM under a key taken from the server's
//! private key. The stored format is `nonce (12 bytes) || ciphertext || tag`.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::database::Database;

/// Size of the AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of the AES-256 key in bytes
pub const ASSET_KEY_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetName {
    AndroidPubSubToken,
    AndroidFleetServerSecret,
}

impl AssetName {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetName::AndroidPubSubToken => "android_pubsub_token",
            AssetName::AndroidFleetServerSecret => "android_fleet_server_secret",
        }
    }
}

impl fmt::Display for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("private key must be at least {ASSET_KEY_SIZE} bytes, got {0}")]
    ShortKey(usize),

    #[error("generate nonce: {0}")]
    Random(getrandom::Error),

    #[error("encrypting {0}")]
    Encrypt(AssetName),

    #[error("decrypting {0}")]
    Decrypt(AssetName),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Key the config assets are sealed with. Keys longer than
/// [`ASSET_KEY_SIZE`] bytes are truncated.
#[derive(Clone)]
pub struct AssetKey([u8; ASSET_KEY_SIZE]);

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AssetKey(..)")
    }
}

impl AssetKey {
    pub fn new(private_key: &str) -> Result<Self, AssetError> {
        let bytes = private_key.as_bytes();
        if bytes.len() < ASSET_KEY_SIZE {
            return Err(AssetError::ShortKey(bytes.len()));
        }
        let mut key = [0u8; ASSET_KEY_SIZE];
        key.copy_from_slice(&bytes[..ASSET_KEY_SIZE]);
        Ok(Self(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// Seal `value` under a fresh random nonce.
    pub fn encrypt(&self, name: AssetName, value: &[u8]) -> Result<Vec<u8>, AssetError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes).map_err(AssetError::Random)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, value)
            .map_err(|_| AssetError::Encrypt(name))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, name: AssetName, sealed: &[u8]) -> Result<Vec<u8>, AssetError> {
        if sealed.len() < NONCE_SIZE {
            return Err(AssetError::Decrypt(name));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AssetError::Decrypt(name))
    }
}

pub struct ConfigAsset;

impl ConfigAsset {
    /// Read and decrypt an asset.
    pub async fn get(
        name: AssetName,
        key: &AssetKey,
        db: &Database,
    ) -> Result<Option<Vec<u8>>, AssetError> {
        let sealed = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM mdm_config_assets WHERE name = ?1",
        )
        .bind(name.as_str())
        .fetch_optional(&**db)
        .await?;

        sealed.map(|sealed| key.decrypt(name, &sealed)).transpose()
    }

    /// Encrypt and insert or replace an asset.
    pub async fn put(
        name: AssetName,
        value: &[u8],
        key: &AssetKey,
        db: &Database,
    ) -> Result<(), AssetError> {
        let sealed = key.encrypt(name, value)?;
        sqlx::query(
            r#"
            INSERT INTO mdm_config_assets (name, value) VALUES (?1, ?2)
            ON CONFLICT (name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(name.as_str())
        .bind(sealed)
        .execute(&**db)
        .await?;
        Ok(())
    }

    pub async fn delete(names: &[AssetName], db: &Database) -> Result<(), sqlx::Error> {
        for name in names {
            sqlx::query("DELETE FROM mdm_config_assets WHERE name = ?1")
                .bind(name.as_str())
                .execute(&**db)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    async fn raw_value(name: AssetName, db: &Database) -> Vec<u8> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM mdm_config_assets WHERE name = ?1")
            .bind(name.as_str())
            .fetch_one(&**db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_replaces_value() {
        let db = Database::in_memory().await.unwrap();
        let key = AssetKey::new(KEY).unwrap();
        let name = AssetName::AndroidFleetServerSecret;

        assert!(ConfigAsset::get(name, &key, &db).await.unwrap().is_none());
        ConfigAsset::put(name, b"one", &key, &db).await.unwrap();
        ConfigAsset::put(name, b"two", &key, &db).await.unwrap();
        assert_eq!(ConfigAsset::get(name, &key, &db).await.unwrap().unwrap(), b"two");

        ConfigAsset::delete(&[name], &db).await.unwrap();
        assert!(ConfigAsset::get(name, &key, &db).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_are_stored_encrypted() {
        let db = Database::in_memory().await.unwrap();
        let key = AssetKey::new(KEY).unwrap();
        let name = AssetName::AndroidPubSubToken;

        ConfigAsset::put(name, b"pubsub-token", &key, &db).await.unwrap();
        let stored = raw_value(name, &db).await;
        assert_ne!(stored, b"pubsub-token");
        assert!(!stored.windows(6).any(|w| w == b"pubsub"));
        // nonce + plaintext + 16 byte tag
        assert_eq!(stored.len(), NONCE_SIZE + b"pubsub-token".len() + 16);

        let other = AssetKey::new("fedcba9876543210fedcba9876543210").unwrap();
        assert!(matches!(
            ConfigAsset::get(name, &other, &db).await,
            Err(AssetError::Decrypt(AssetName::AndroidPubSubToken))
        ));
    }

    #[test]
    fn test_key_length() {
        assert!(matches!(AssetKey::new("short"), Err(AssetError::ShortKey(5))));

        // only the first 32 bytes matter
        let long = AssetKey::new(&format!("{KEY}-suffix")).unwrap();
        let sealed = long.encrypt(AssetName::AndroidPubSubToken, b"x").unwrap();
        let exact = AssetKey::new(KEY).unwrap();
        assert_eq!(
            exact.decrypt(AssetName::AndroidPubSubToken, &sealed).unwrap(),
            b"x"
        );
        assert!(exact.decrypt(AssetName::AndroidPubSubToken, b"tiny").is_err());
    }
}
