//! Device identity held in the `config` bucket.
//!
//! The host UUID is created on first access and never rewritten unless the
//! stored bytes are unreadable. The RSA key pair is created exactly when no
//! private key is stored and is never rotated here.

use rand_core::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding, PrivateKeyInfo};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::kv::{Bucket, Store, StoreError, WriteTx};

pub const KEY_BITS: usize = 2048;

pub const UUID_KEY: &[u8] = b"uuid";
pub const PRIVATE_KEY_KEY: &[u8] = b"privateKey";
pub const PUBLIC_KEY_KEY: &[u8] = b"publicKey";
pub const FINGERPRINT_KEY: &[u8] = b"keyFingerprint";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no private key stored")]
    MissingKey,

    #[error("stored private key is not an RSA key (algorithm {0})")]
    NotRsa(String),

    #[error("stored private key is malformed: {0}")]
    Malformed(String),

    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("key encoding error: {0}")]
    Encoding(String),

    #[error("key generation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
struct PublicMaterial {
    pem: String,
    fingerprint: String,
}

/// Lazily initialized host identity.
#[derive(Debug)]
pub struct Identity {
    store: Store,
    public: OnceCell<PublicMaterial>,
}

impl Identity {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            public: OnceCell::new(),
        }
    }

    /// Make sure a key pair exists, generating one if no private key is stored.
    /// Safe to call any number of times.
    pub async fn ensure_keys(&self) -> Result<(), IdentityError> {
        self.public
            .get_or_try_init(|| async {
                let mut tx = self.store.update().await?;
                let material = load_or_create_keys(&mut tx).await?;
                tx.commit().await?;
                Ok::<_, IdentityError>(material)
            })
            .await?;
        Ok(())
    }

    /// The host UUID, created and persisted on first use. Unparseable
    /// stored bytes are replaced with a fresh identifier.
    pub async fn host_identifier(&self) -> Result<String, IdentityError> {
        let mut tx = self.store.update().await?;

        if let Some(raw) = tx.get(Bucket::Config, UUID_KEY).await? {
            let parsed = std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| Uuid::parse_str(s.trim()).ok());
            if let Some(id) = parsed {
                return Ok(id.to_string());
            }
            tracing::warn!("stored host identifier is corrupt, regenerating");
        }

        let id = Uuid::new_v4().to_string();
        tx.put(Bucket::Config, UUID_KEY, id.as_bytes()).await?;
        tx.commit().await?;
        tracing::info!(host_identifier = %id, "generated host identifier");
        Ok(id)
    }

    pub async fn private_key(&self) -> Result<RsaPrivateKey, IdentityError> {
        let der = self
            .store
            .get(Bucket::Config, PRIVATE_KEY_KEY)
            .await?
            .ok_or(IdentityError::MissingKey)?;
        parse_private_key(&der)
    }

    pub async fn public_key_pem(&self) -> Result<String, IdentityError> {
        Ok(self.public_material().await?.pem)
    }

    pub async fn fingerprint(&self) -> Result<String, IdentityError> {
        Ok(self.public_material().await?.fingerprint)
    }

    async fn public_material(&self) -> Result<PublicMaterial, IdentityError> {
        if let Some(material) = self.public.get() {
            return Ok(material.clone());
        }

        // validates the key algorithm before trusting the stored public half
        self.private_key().await?;
        let mut rtx = self.store.view().await?;
        let pem = rtx.get(Bucket::Config, PUBLIC_KEY_KEY).await?;
        let fingerprint = rtx.get(Bucket::Config, FINGERPRINT_KEY).await?;
        match (pem, fingerprint) {
            (Some(pem), Some(fingerprint)) => Ok(PublicMaterial {
                pem: String::from_utf8_lossy(&pem).into_owned(),
                fingerprint: String::from_utf8_lossy(&fingerprint).into_owned(),
            }),
            _ => Err(IdentityError::MissingKey),
        }
    }
}

async fn load_or_create_keys(tx: &mut WriteTx) -> Result<PublicMaterial, IdentityError> {
    if let Some(der) = tx.get(Bucket::Config, PRIVATE_KEY_KEY).await? {
        let key = parse_private_key(&der)?;
        let pem = tx.get(Bucket::Config, PUBLIC_KEY_KEY).await?;
        let fingerprint = tx.get(Bucket::Config, FINGERPRINT_KEY).await?;

        if let (Some(pem), Some(fingerprint)) = (pem, fingerprint) {
            return Ok(PublicMaterial {
                pem: String::from_utf8_lossy(&pem).into_owned(),
                fingerprint: String::from_utf8_lossy(&fingerprint).into_owned(),
            });
        }

        // the public half went missing, derive it again from the private key
        let material = public_material(&RsaPublicKey::from(&key))?;
        tx.put(Bucket::Config, PUBLIC_KEY_KEY, material.pem.as_bytes())
            .await?;
        tx.put(Bucket::Config, FINGERPRINT_KEY, material.fingerprint.as_bytes())
            .await?;
        return Ok(material);
    }

    tracing::info!(bits = KEY_BITS, "generating host key pair");
    let key = tokio::task::spawn_blocking(|| RsaPrivateKey::new(&mut OsRng, KEY_BITS)).await??;
    let der = key
        .to_pkcs8_der()
        .map_err(|e| IdentityError::Encoding(e.to_string()))?;
    let material = public_material(&RsaPublicKey::from(&key))?;

    tx.put(Bucket::Config, PRIVATE_KEY_KEY, der.as_bytes()).await?;
    tx.put(Bucket::Config, PUBLIC_KEY_KEY, material.pem.as_bytes())
        .await?;
    tx.put(Bucket::Config, FINGERPRINT_KEY, material.fingerprint.as_bytes())
        .await?;

    tracing::info!(fingerprint = %material.fingerprint, "stored new host key pair");
    Ok(material)
}

fn public_material(public: &RsaPublicKey) -> Result<PublicMaterial, IdentityError> {
    let der = public
        .to_public_key_der()
        .map_err(|e| IdentityError::Encoding(e.to_string()))?;
    let pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| IdentityError::Encoding(e.to_string()))?;

    Ok(PublicMaterial {
        pem,
        fingerprint: fingerprint(der.as_bytes()),
    })
}

fn parse_private_key(der: &[u8]) -> Result<RsaPrivateKey, IdentityError> {
    let info =
        PrivateKeyInfo::try_from(der).map_err(|e| IdentityError::Malformed(e.to_string()))?;
    if info.algorithm.oid != rsa::pkcs1::ALGORITHM_OID {
        return Err(IdentityError::NotRsa(info.algorithm.oid.to_string()));
    }
    RsaPrivateKey::from_pkcs8_der(der).map_err(|e| IdentityError::Malformed(e.to_string()))
}

/// SHA-256 of the DER public key as colon-separated lowercase hex pairs.
pub fn fingerprint(public_der: &[u8]) -> String {
    Sha256::digest(public_der)
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(":")
}
