//! Local-first caching for remote collections.
//!
//! This module provides a source-agnostic caching mechanism that:
//! - Keeps the latest full snapshot of each collection in a versioned SQLite store
//! - Treats snapshots older than the TTL as misses and evicts them on read
//! - Serves a bounded first page on a miss and refreshes in the background
//! - Collapses concurrent refreshes of one collection into a single sweep

mod layer;
mod local;
mod storage;
mod traits;

pub use layer::{CacheLayer, LoaderSettings};
pub use local::{LocalCache, StoreLocation};
pub use traits::{LoadOrigin, Record, DEFAULT_TTL_DAYS};
