//! Services the host provides to every module.
//!
//! Cache and offline storage are scoped per [`Family`]: all components of a
//! family share them, other families never see them.

use crate::channel::HostEventTarget;
use crate::errors::{ErrorCode, IntegrationError, IntegrationResult};
use crate::types::{AccessToken, Family};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

// ═══════════════════════════════════════════════════════════════════
// CACHE: session lifetime, in memory
// ═══════════════════════════════════════════════════════════════════

/// In-memory cache shared by the components of one family.
///
/// Lives as long as the host session. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct CacheDataStorage {
    entries: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl CacheDataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Typed read; `None` when absent or of another shape.
    pub fn get_as<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Serialize) -> IntegrationResult<()> {
        let value = serde_json::to_value(value)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ═══════════════════════════════════════════════════════════════════
// OFFLINE STORAGE: persisted, async
// ═══════════════════════════════════════════════════════════════════

/// Key-value store persisted on the user's device.
///
/// The host encrypts data at rest. A `get` after a `set` of the same key by
/// the same caller observes the value.
#[async_trait]
pub trait OfflineDataStorage: Send + Sync {
    /// `None` if nothing is stored under `key`.
    async fn get(&self, key: &str) -> IntegrationResult<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: serde_json::Value) -> IntegrationResult<()>;

    /// Does nothing if `key` is absent.
    async fn delete(&self, key: &str) -> IntegrationResult<()>;
}

/// A stored value as the host persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineRecord {
    /// Serialized JSON value
    #[serde(with = "base64_serde")]
    pub data: Vec<u8>,

    /// Checksum of the data (BLAKE3)
    #[serde(with = "hex_serde")]
    pub checksum: [u8; 32],

    pub stored_at: DateTime<Utc>,
}

impl OfflineRecord {
    pub fn seal(value: &serde_json::Value) -> IntegrationResult<Self> {
        let data = serde_json::to_vec(value)?;
        let checksum = *blake3::hash(&data).as_bytes();
        Ok(Self {
            data,
            checksum,
            stored_at: Utc::now(),
        })
    }

    /// Verify the checksum
    pub fn verify(&self) -> bool {
        blake3::hash(&self.data).as_bytes() == &self.checksum
    }

    pub fn open(&self) -> IntegrationResult<serde_json::Value> {
        if !self.verify() {
            return Err(IntegrationError::new(
                ErrorCode::ChecksumMismatch,
                "Offline record checksum verification failed",
            )
            .with_context("checksum", hex::encode(self.checksum)));
        }
        Ok(serde_json::from_slice(&self.data)?)
    }
}

/// Offline storage kept in memory, one area per family.
#[derive(Debug, Default)]
pub struct MemoryOfflineStorage {
    records: RwLock<HashMap<String, OfflineRecord>>,
}

impl MemoryOfflineStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw record, as it would be persisted.
    pub fn record(&self, key: &str) -> Option<OfflineRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Replace a raw record (restoring from disk).
    pub fn restore(&self, key: impl Into<String>, record: OfflineRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), record);
    }
}

#[async_trait]
impl OfflineDataStorage for MemoryOfflineStorage {
    async fn get(&self, key: &str) -> IntegrationResult<Option<serde_json::Value>> {
        match self.record(key) {
            Some(record) => record.open().map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> IntegrationResult<()> {
        let record = OfflineRecord::seal(&value)?;
        self.restore(key, record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> IntegrationResult<()> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// ACCESS TOKEN
// ═══════════════════════════════════════════════════════════════════

/// Issues tokens for secured backend calls.
///
/// Implemented by the host only; token exchange for mandates happens behind
/// this call. Rejects with `AccessTokenUnavailable` when no authenticated
/// session exists. Retry policy belongs to the caller.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> IntegrationResult<AccessToken>;
}

// ═══════════════════════════════════════════════════════════════════
// HOST SERVICES
// ═══════════════════════════════════════════════════════════════════

/// Everything the host hands to a module at bootstrap.
#[derive(Clone)]
pub struct HostServices {
    pub family: Family,

    pub cache_data_storage: CacheDataStorage,

    pub offline_data_storage: Arc<dyn OfflineDataStorage>,

    /// Module-wide events. Component-specific events are dispatched on the
    /// component itself.
    pub events: HostEventTarget,

    access_token: Arc<dyn AccessTokenProvider>,
}

impl HostServices {
    pub fn new(
        family: Family,
        cache_data_storage: CacheDataStorage,
        offline_data_storage: Arc<dyn OfflineDataStorage>,
        events: HostEventTarget,
        access_token: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            family,
            cache_data_storage,
            offline_data_storage,
            events,
            access_token,
        }
    }

    pub async fn get_access_token(&self) -> IntegrationResult<AccessToken> {
        self.access_token.access_token().await
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices")
            .field("family", &self.family)
            .field("cache_entries", &self.cache_data_storage.len())
            .field("events", &self.events)
            .finish()
    }
}

// Base64 serialization for binary data
mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

// Hex serialization for checksums
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid checksum length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_shared_between_clones() {
        let cache = CacheDataStorage::new();
        let other = cache.clone();
        cache.set("resource", json!({"count": 3})).unwrap();

        assert_eq!(other.get("resource"), Some(json!({"count": 3})));
        assert_eq!(other.get_as::<serde_json::Value>("resource").unwrap()["count"], 3);
        assert!(other.contains("resource"));

        assert!(other.remove("resource").is_some());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_offline_read_your_writes() {
        let storage = MemoryOfflineStorage::new();
        assert_eq!(storage.get("k").await.unwrap(), None);

        storage.set("k", json!("v1")).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(json!("v1")));

        storage.set("k", json!("v2")).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(json!("v2")));

        storage.delete("k").await.unwrap();
        storage.delete("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tampered_record_detected() {
        let storage = MemoryOfflineStorage::new();
        storage.set("k", json!({"secret": 1})).await.unwrap();

        let mut record = storage.record("k").unwrap();
        record.data = serde_json::to_vec(&json!({"secret": 2})).unwrap();
        storage.restore("k", record);

        let err = storage.get("k").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ChecksumMismatch);
    }

    #[test]
    fn test_record_serialization() {
        let record = OfflineRecord::seal(&json!([1, 2, 3])).unwrap();
        let text = serde_json::to_string(&record).unwrap();
        let back: OfflineRecord = serde_json::from_str(&text).unwrap();
        assert!(back.verify());
        assert_eq!(back.open().unwrap(), json!([1, 2, 3]));
    }
}
