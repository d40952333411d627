//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Default number of days a stored snapshot stays fresh.
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Anything that can be fetched from a source and stored in the cache.
///
/// The cache and fetch layers never look inside a record; they only move it
/// through serde.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Record for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// The latest full snapshot of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<R> {
  pub key: String,
  /// Records in source order
  pub records: Vec<R>,
  pub stored_at: DateTime<Utc>,
  /// Hex SHA-256 of the serialized records
  pub digest: String,
}

impl<R> CacheEntry<R> {
  pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
    now - self.stored_at
  }

  /// Fresh iff `now - stored_at < ttl`.
  pub fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
    self.age_at(now) < ttl
  }

  pub fn is_fresh(&self, ttl: Duration) -> bool {
    self.is_fresh_at(ttl, Utc::now())
  }
}

/// Where the data handed to a caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
  /// Fresh snapshot from the local cache
  Cache { stored_at: DateTime<Utc> },
  /// Bounded first page from the source; a full sweep follows
  InitialPage,
  /// Full sweep result
  FullSweep { truncated: bool },
}
