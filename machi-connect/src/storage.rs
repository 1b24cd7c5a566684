//! Key/value persistence backends.
//!
//! The wallet manager only ever needs to remember one thing across reloads:
//! which wallets were connected, so they can be silently re-attached when
//! they announce themselves again. [`KeyValueStorage`] is the string-keyed
//! contract the host environment provides; [`ConnectedWallets`] layers the
//! rdns set on top of it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::StorageResult;

/// String-keyed persistence, in the spirit of `localStorage`.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value.
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

/// In-memory storage.
///
/// Fast but not persistent across restarts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create a new memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// File-based storage.
///
/// Keeps one file per key in a directory.
#[derive(Debug)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new file storage with the given base path.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Get the file path for a key.
    fn key_path(&self, key: &str) -> PathBuf {
        let safe_key = key.replace([':', '/', '\\'], "_");
        self.base_path.join(format!("{safe_key}.json"))
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match tokio::fs::read_to_string(self.key_path(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        tokio::fs::write(self.key_path(key), value).await?;
        debug!(key = %key, "saved value to file");
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => {
                debug!(key = %key, "deleted value file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The persisted set of rdns values that should auto-reconnect.
///
/// Stored as a JSON array under a single key. Updates are read-modify-write
/// against the backend, so clones share one lock that serializes them.
#[derive(Clone)]
pub struct ConnectedWallets {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    update_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for ConnectedWallets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedWallets")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ConnectedWallets {
    /// Track the set under `key` in `storage`.
    pub fn new(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            update_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load the stored rdns values.
    ///
    /// A missing or corrupt entry reads as an empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub async fn load(&self) -> StorageResult<Vec<String>> {
        let Some(raw) = self.storage.get(&self.key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(ids) => Ok(ids),
            Err(e) => {
                warn!(key = %self.key, error = %e, "ignoring corrupt connected wallet list");
                Ok(Vec::new())
            }
        }
    }

    /// Whether `rdns` is in the set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub async fn contains(&self, rdns: &str) -> StorageResult<bool> {
        Ok(self.load().await?.iter().any(|id| id == rdns))
    }

    /// Add `rdns` to the set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written.
    pub async fn add(&self, rdns: &str) -> StorageResult<()> {
        let _update = self.update_lock.lock().await;
        let mut ids = self.load().await?;
        if ids.iter().any(|id| id == rdns) {
            return Ok(());
        }
        ids.push(rdns.to_string());
        self.storage
            .set(&self.key, &serde_json::to_string(&ids)?)
            .await
    }

    /// Remove `rdns` from the set, deleting the key once the set is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written.
    pub async fn remove(&self, rdns: &str) -> StorageResult<()> {
        let _update = self.update_lock.lock().await;
        let ids: Vec<String> = self
            .load()
            .await?
            .into_iter()
            .filter(|id| id != rdns)
            .collect();
        if ids.is_empty() {
            self.storage.remove(&self.key).await
        } else {
            self.storage
                .set(&self.key, &serde_json::to_string(&ids)?)
                .await
        }
    }

    /// Forget every wallet.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    pub async fn clear(&self) -> StorageResult<()> {
        let _update = self.update_lock.lock().await;
        self.storage.remove(&self.key).await
    }
}
