//! Opaque key-value persistence abstraction
//!
//! The core persists its durable tables as key -> JSON blobs. The storage
//! collaborator owns the concrete medium (platform keystore, SQLite, files);
//! this crate only assumes a stable round-trip of the stored bytes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Well-known storage keys owned by the mesh core
pub mod keys {
    pub const MESH_IDENTITY: &str = "mesh_identity";
    pub const TRUSTED_PEERS: &str = "trusted_peers";
    pub const PENDING_TRANSACTIONS: &str = "pending_transactions";
    pub const TRANSACTION_HISTORY: &str = "transaction_history";
    pub const CONNECTION_REQUESTS: &str = "connection_requests";
    pub const PRIVACY_ZONE_SETTINGS: &str = "privacy_zone_settings";
}

/// Trait for platform-agnostic blob storage
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store a blob under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Load the blob stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove the blob stored under `key`; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all stored keys
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// In-memory storage implementation
///
/// Suitable for tests and as the runtime cache layer in front of a
/// platform-specific store.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }
}

/// Store a serde value as JSON under `key`
pub async fn put_json<T: serde::Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.put(key, &bytes).await
}

/// Load and deserialize the JSON blob under `key`, if present
pub async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| Error::Serialization(format!("{}: {}", key, e)))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}
