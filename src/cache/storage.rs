//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::error::StoreError;

/// One stored snapshot with its records still serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
  /// JSON array of records
  pub payload: Vec<u8>,
  pub record_count: usize,
  pub digest: String,
  pub stored_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Entries are opaque payloads keyed by collection name; one row per key,
/// replaced wholesale on write.
pub trait CacheStorage: Send + Sync {
  /// Get the entry for a key, if any.
  fn read(&self, key: &str) -> Result<Option<StoredEntry>, StoreError>;

  /// Replace the entry for a key.
  fn write(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError>;

  /// Remove the entry for a key. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<(), StoreError>;

  /// Remove every entry.
  fn clear(&self) -> Result<(), StoreError>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn read(&self, _key: &str) -> Result<Option<StoredEntry>, StoreError> {
    Ok(None) // Always miss
  }

  fn write(&self, _key: &str, _entry: &StoredEntry) -> Result<(), StoreError> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<(), StoreError> {
    Ok(())
  }

  fn clear(&self) -> Result<(), StoreError> {
    Ok(())
  }
}

/// Schema for the entry table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    key TEXT PRIMARY KEY,
    records BLOB NOT NULL,
    record_count INTEGER NOT NULL,
    digest TEXT NOT NULL,
    stored_at TEXT NOT NULL
);
"#;

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) a store at `path` and bring it to `version`.
  pub fn open(path: &Path, version: u32) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Open(format!(
          "failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StoreError::Open(format!(
        "failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    Self::with_connection(conn, version)
  }

  /// Private, process-local store. Used in tests and when no path is set.
  pub fn open_in_memory(version: u32) -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()
      .map_err(|e| StoreError::Open(format!("failed to open in-memory cache: {}", e)))?;
    Self::with_connection(conn, version)
  }

  fn with_connection(mut conn: Connection, version: u32) -> Result<Self, StoreError> {
    run_migrations(&mut conn, version)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

/// Create the entry table and apply the version marker.
///
/// Moving to a higher version clears every entry in the same transaction.
/// A store written by a newer version is refused.
fn run_migrations(conn: &mut Connection, version: u32) -> Result<(), StoreError> {
  let found: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
  if found > version {
    return Err(StoreError::VersionMismatch {
      found,
      supported: version,
    });
  }

  let tx = conn.transaction()?;
  tx.execute_batch(CACHE_SCHEMA)?;
  if found < version {
    let cleared = tx.execute("DELETE FROM collections", [])?;
    tx.pragma_update(None, "user_version", version)?;
    info!(from = found, to = version, cleared, "cache schema version bumped, entries cleared");
  }
  tx.commit()?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn read(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
    let conn = self.conn()?;

    let row: Option<(Vec<u8>, i64, String, String)> = conn
      .query_row(
        "SELECT records, record_count, digest, stored_at FROM collections WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    let Some((payload, record_count, digest, stored_at)) = row else {
      return Ok(None);
    };

    let stored_at = parse_datetime(&stored_at).map_err(|reason| StoreError::Corrupt {
      key: key.to_string(),
      reason,
    })?;

    Ok(Some(StoredEntry {
      payload,
      record_count: usize::try_from(record_count).unwrap_or_default(),
      digest,
      stored_at,
    }))
  }

  fn write(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError> {
    let conn = self.conn()?;

    // Single statement, so readers see either the old row or the new one
    conn.execute(
      "INSERT OR REPLACE INTO collections (key, records, record_count, digest, stored_at)
       VALUES (?, ?, ?, ?, ?)",
      params![
        key,
        entry.payload,
        entry.record_count as i64,
        entry.digest,
        format_datetime(entry.stored_at),
      ],
    )?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM collections WHERE key = ?", params![key])?;
    Ok(())
  }

  fn clear(&self) -> Result<(), StoreError> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM collections", [])?;
    Ok(())
  }
}

fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn entry(payload: &str) -> StoredEntry {
    StoredEntry {
      payload: payload.as_bytes().to_vec(),
      record_count: 2,
      digest: "abc".to_string(),
      stored_at: Utc::now(),
    }
  }

  #[test]
  fn test_write_then_read() {
    let storage = SqliteStorage::open_in_memory(1).unwrap();
    let written = entry("[1,2]");

    storage.write("demo", &written).unwrap();

    assert_eq!(storage.read("demo").unwrap(), Some(written));
  }

  #[test]
  fn test_write_replaces_wholesale() {
    let storage = SqliteStorage::open_in_memory(1).unwrap();
    storage.write("demo", &entry("[1,2]")).unwrap();

    let mut newer = entry("[3]");
    newer.record_count = 1;
    newer.stored_at = Utc::now() + Duration::seconds(1);
    storage.write("demo", &newer).unwrap();

    assert_eq!(storage.read("demo").unwrap(), Some(newer));
  }

  #[test]
  fn test_remove_is_idempotent() {
    let storage = SqliteStorage::open_in_memory(1).unwrap();
    storage.write("demo", &entry("[1,2]")).unwrap();

    storage.remove("demo").unwrap();
    storage.remove("demo").unwrap();

    assert_eq!(storage.read("demo").unwrap(), None);
  }

  #[test]
  fn test_clear_removes_all_keys() {
    let storage = SqliteStorage::open_in_memory(1).unwrap();
    storage.write("a", &entry("[1]")).unwrap();
    storage.write("b", &entry("[2]")).unwrap();

    storage.clear().unwrap();

    assert_eq!(storage.read("a").unwrap(), None);
    assert_eq!(storage.read("b").unwrap(), None);
  }

  #[test]
  fn test_version_bump_clears_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let storage = SqliteStorage::open(&path, 1).unwrap();
      storage.write("demo", &entry("[1,2]")).unwrap();
    }
    {
      // Same version keeps data
      let storage = SqliteStorage::open(&path, 1).unwrap();
      assert!(storage.read("demo").unwrap().is_some());
    }

    let storage = SqliteStorage::open(&path, 2).unwrap();
    assert_eq!(storage.read("demo").unwrap(), None);
  }

  #[test]
  fn test_newer_store_version_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    drop(SqliteStorage::open(&path, 3).unwrap());

    let err = SqliteStorage::open(&path, 2).err().unwrap();

    assert!(matches!(
      err,
      StoreError::VersionMismatch {
        found: 3,
        supported: 2
      }
    ));
  }

  #[test]
  fn test_timestamps_round_trip_exactly() {
    let stored_at = Utc::now();
    assert_eq!(parse_datetime(&format_datetime(stored_at)).unwrap(), stored_at);
  }
}
