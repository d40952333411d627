//! Async, failure-absorbing facade over a lazily opened cache store.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::storage::{CacheStorage, NoopStorage, SqliteStorage, StoredEntry};
use super::traits::{CacheEntry, Record};
use crate::error::StoreError;

/// Where the durable store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
  /// Caching switched off; every read misses
  Disabled,
  /// Process-local database, gone on `close`
  Memory,
  File(PathBuf),
}

enum Handle {
  Closed,
  Open(Arc<dyn CacheStorage>),
  /// Opening failed; stays a miss until `close` resets it
  Failed,
}

/// The local persistent cache.
///
/// The store is opened on first use (or by `init`) and the handle is shared
/// until `close`. Store failures are logged and reported as misses; nothing
/// in here returns an error to the caller.
pub struct LocalCache {
  location: StoreLocation,
  version: u32,
  ttl: Duration,
  handle: Mutex<Handle>,
}

impl LocalCache {
  pub fn new(location: StoreLocation, version: u32, ttl: Duration) -> Self {
    Self {
      location,
      version,
      ttl,
      handle: Mutex::new(Handle::Closed),
    }
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Open the store now instead of on first use. Returns whether it is usable.
  pub async fn init(&self) -> bool {
    self.storage().await.is_some()
  }

  /// Drop the shared handle. The next call opens the store again.
  pub async fn close(&self) {
    *self.handle.lock().await = Handle::Closed;
  }

  async fn storage(&self) -> Option<Arc<dyn CacheStorage>> {
    let mut handle = self.handle.lock().await;
    match &*handle {
      Handle::Open(storage) => return Some(Arc::clone(storage)),
      Handle::Failed => return None,
      Handle::Closed => {}
    }

    let location = self.location.clone();
    let version = self.version;
    let opened = tokio::task::spawn_blocking(move || open_storage(&location, version))
      .await
      .map_err(|e| StoreError::Unavailable(e.to_string()))
      .and_then(|result| result);

    match opened {
      Ok(storage) => {
        debug!(location = ?self.location, version, "cache store opened");
        *handle = Handle::Open(Arc::clone(&storage));
        Some(storage)
      }
      Err(e) => {
        warn!(location = ?self.location, error = %e, "cache store unavailable, caching disabled");
        *handle = Handle::Failed;
        None
      }
    }
  }

  /// Run a blocking store operation off the async threads.
  async fn with_storage<T, F>(&self, op: F) -> Result<Option<T>, StoreError>
  where
    T: Send + 'static,
    F: FnOnce(&dyn CacheStorage) -> Result<T, StoreError> + Send + 'static,
  {
    let Some(storage) = self.storage().await else {
      return Ok(None);
    };
    tokio::task::spawn_blocking(move || op(storage.as_ref()))
      .await
      .map_err(|e| StoreError::Unavailable(e.to_string()))?
      .map(Some)
  }

  /// The stored entry for `key`, verbatim, regardless of age.
  pub async fn get<R: Record>(&self, key: &str) -> Option<CacheEntry<R>> {
    let owned_key = key.to_string();
    let stored = self
      .with_storage(move |s| s.read(&owned_key))
      .await
      .map(Option::flatten);

    let stored = match stored {
      Ok(Some(stored)) => stored,
      Ok(None) => return None,
      Err(e) => {
        warn!(collection = key, error = %e, "cache read failed, treating as miss");
        return None;
      }
    };

    match serde_json::from_slice::<Vec<R>>(&stored.payload) {
      Ok(records) if records.len() != stored.record_count => {
        warn!(
          collection = key,
          expected = stored.record_count,
          found = records.len(),
          "cached record count mismatch, treating as miss"
        );
        None
      }
      Ok(records) => Some(CacheEntry {
        key: key.to_string(),
        records,
        stored_at: stored.stored_at,
        digest: stored.digest,
      }),
      Err(e) => {
        warn!(collection = key, error = %e, "cached records do not decode, treating as miss");
        None
      }
    }
  }

  pub fn is_fresh<R>(&self, entry: &CacheEntry<R>) -> bool {
    entry.is_fresh(self.ttl)
  }

  /// Replace the entry for `key` with `records`, stamped now.
  ///
  /// Returns the digest of what was stored, or `None` if nothing was.
  pub async fn put<R: Record>(&self, key: &str, records: &[R]) -> Option<String> {
    let payload = match serde_json::to_vec(records) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(collection = key, error = %e, "failed to encode records for cache");
        return None;
      }
    };
    let entry = StoredEntry {
      digest: digest_payload(&payload),
      payload,
      record_count: records.len(),
      stored_at: Utc::now(),
    };
    let digest = entry.digest.clone();

    let owned_key = key.to_string();
    match self.with_storage(move |s| s.write(&owned_key, &entry)).await {
      Ok(Some(())) => {
        debug!(collection = key, records = records.len(), "cache entry stored");
        Some(digest)
      }
      Ok(None) => None,
      Err(e) => {
        warn!(collection = key, error = %e, "cache write failed");
        None
      }
    }
  }

  /// Remove the entry for `key`. Missing keys are fine.
  pub async fn delete(&self, key: &str) {
    let owned_key = key.to_string();
    if let Err(e) = self.with_storage(move |s| s.remove(&owned_key)).await {
      warn!(collection = key, error = %e, "cache delete failed");
    }
  }

  /// Remove every entry.
  pub async fn clear_all(&self) {
    if let Err(e) = self.with_storage(|s| s.clear()).await {
      warn!(error = %e, "cache clear failed");
    }
  }
}

fn open_storage(location: &StoreLocation, version: u32) -> Result<Arc<dyn CacheStorage>, StoreError> {
  let storage: Arc<dyn CacheStorage> = match location {
    StoreLocation::Disabled => Arc::new(NoopStorage),
    StoreLocation::Memory => Arc::new(SqliteStorage::open_in_memory(version)?),
    StoreLocation::File(path) => Arc::new(SqliteStorage::open(path, version)?),
  };
  Ok(storage)
}

/// Hex SHA-256 of a serialized record list.
pub fn digest_payload(payload: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(payload);
  hex::encode(hasher.finalize())
}
