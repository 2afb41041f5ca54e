//! Storage proxy for the sandboxed engine.
//!
//! The sandbox cannot reach secure storage itself, so it sends
//! `storageGet`/`storageSet`/`storageRemove` messages and waits for a
//! `storageResponse` carrying the same id. Every request gets a reply:
//! storage failures come back as `ok: false` instead of propagating, since a
//! lost reply would leave the sandbox caller blocked forever.

use std::sync::Arc;

use crate::bridge::codec::{StorageKind, StorageRequest, StorageResponse};
use crate::error::redact_sensitive_detail;
use crate::secure_store::SecureStorage;

pub struct StorageProxy {
    storage: Arc<dyn SecureStorage>,
}

impl StorageProxy {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    pub async fn handle(&self, request: StorageRequest) -> StorageResponse {
        let StorageRequest {
            kind,
            id,
            key,
            value,
        } = request;

        let outcome = match kind {
            StorageKind::Get => self.storage.get_item(&key).await,
            StorageKind::Set => match value {
                Some(value) => self.storage.set_item(&key, &value).await.map(|_| None),
                None => {
                    return StorageResponse::failure(id, format!("storageSet for {key} has no value"));
                }
            },
            StorageKind::Remove => self.storage.remove_item(&key).await.map(|_| None),
        };

        match outcome {
            Ok(value) => {
                tracing::debug!(id = %id, kind = kind.as_str(), key = %key, "Storage request served");
                StorageResponse::success(id, value)
            }
            Err(e) => {
                let message = redact_sensitive_detail(&e.to_string());
                tracing::warn!(id = %id, kind = kind.as_str(), key = %key, error = %message, "Storage request failed");
                StorageResponse::failure(id, message)
            }
        }
    }
}
