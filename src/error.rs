//! Typed errors for the source, store and load seams.
//!
//! The application boundary (`main`, config, commands) works in
//! `color_eyre::Result`; these enums are what the data layer hands back.

use thiserror::Error;

/// Failure talking to the remote tabular source.
///
/// Carries strings rather than the underlying client errors so a single
/// in-flight sweep result can be cloned out to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
  #[error("request to '{collection}' failed: {message}")]
  Transport { collection: String, message: String },
  #[error("source rejected '{collection}' (HTTP {status}): {message}")]
  Remote {
    collection: String,
    status: u16,
    message: String,
  },
  #[error("could not decode rows of '{collection}': {message}")]
  Decode { collection: String, message: String },
}

/// Failure of the local durable store. Never escapes `LocalCache`.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to open cache store: {0}")]
  Open(String),
  #[error("cache store I/O failed: {0}")]
  Io(#[from] rusqlite::Error),
  #[error("corrupt cache entry '{key}': {reason}")]
  Corrupt { key: String, reason: String },
  #[error("cache store is at version {found}, newer than supported version {supported}")]
  VersionMismatch { found: u32, supported: u32 },
  #[error("cache store unavailable: {0}")]
  Unavailable(String),
}

/// Failure of a collection load as seen by the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
  #[error(transparent)]
  Source(#[from] SourceError),
  #[error("load was cancelled")]
  Cancelled,
}
