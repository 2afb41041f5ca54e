//! Host-managed secure storage.
//!
//! The bridge consumes storage through [`SecureStorage`]; it never owns the
//! backing store. Two implementations ship with the crate:
//!
//! - [`MemorySecureStorage`]: process-local map, used by tests and ephemeral sessions.
//! - [`EncryptedFileStorage`]: JSON map on disk, each value sealed with
//!   AES-256-GCM under a key derived (HKDF-SHA256) from a master secret.
//!   The entry key is bound as associated data, so ciphertexts cannot be
//!   swapped between keys.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tokio::sync::{Mutex, RwLock};

use crate::error::StorageError;

const NONCE_LEN: usize = 12;
const HKDF_SALT: &[u8] = b"custody-bridge/secure-store/v1";
const HKDF_INFO: &[u8] = b"aes-256-gcm value key";

/// Asynchronous, fallible key/value storage for secret material.
#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Default)]
pub struct MemorySecureStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemorySecureStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl SecureStorage for MemorySecureStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.write().await.remove(key);
        Ok(())
    }
}

/// Encrypted JSON-file storage.
pub struct EncryptedFileStorage {
    path: PathBuf,
    cipher: Aes256Gcm,
    /// Serializes read-modify-write cycles on the file.
    file_lock: Mutex<()>,
}

impl EncryptedFileStorage {
    pub fn new(path: impl Into<PathBuf>, master: &SecretString) -> Result<Self, StorageError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), master.expose_secret().as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|e| StorageError::Crypto(format!("key derivation failed: {e}")))?;
        let cipher = Aes256Gcm::new_from_slice(&okm)
            .map_err(|e| StorageError::Crypto(format!("invalid key length: {e}")))?;

        Ok(Self {
            path: path.into(),
            cipher,
            file_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seal(&self, key: &str, value: &str) -> Result<String, StorageError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: value.as_bytes(),
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Crypto(format!("failed to encrypt value for {key}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    fn open(&self, key: &str, sealed: &str) -> Result<String, StorageError> {
        let blob = BASE64
            .decode(sealed)
            .map_err(|e| StorageError::Corrupt(format!("{key}: invalid base64: {e}")))?;
        if blob.len() <= NONCE_LEN {
            return Err(StorageError::Corrupt(format!("{key}: ciphertext too short")));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Crypto(format!("failed to decrypt value for {key}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| StorageError::Corrupt(format!("{key}: value is not UTF-8: {e}")))
    }

    async fn load(&self, key: &str) -> Result<BTreeMap<String, String>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| StorageError::Corrupt(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StorageError::Io {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn persist(&self, key: &str, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let io_err = |e: std::io::Error| StorageError::Io {
            key: key.to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let text = serde_json::to_string_pretty(items)
            .map_err(|e| StorageError::Corrupt(format!("failed to serialize store: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, text).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl SecureStorage for EncryptedFileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.file_lock.lock().await;
        let items = self.load(key).await?;
        items
            .get(key)
            .map(|sealed| self.open(key, sealed))
            .transpose()
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let sealed = self.seal(key, value)?;
        let _guard = self.file_lock.lock().await;
        let mut items = self.load(key).await?;
        items.insert(key.to_string(), sealed);
        self.persist(key, &items).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.file_lock.lock().await;
        let mut items = self.load(key).await?;
        if items.remove(key).is_some() {
            self.persist(key, &items).await?;
        }
        Ok(())
    }
}
