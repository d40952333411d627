//! Remote tabular data sources and the paginated fetch layer on top of them.
//!
//! - `TabularSource` is the seam: one ordered, ranged read of a named table
//! - `PostgrestSource` talks to a PostgREST/Supabase endpoint
//! - `BulkFetcher` turns single pages into bounded first pages and full sweeps

mod fetcher;
#[cfg(test)]
pub mod memory;
mod postgrest;

use async_trait::async_trait;
use std::sync::Arc;

use crate::cache::Record;
use crate::error::SourceError;

pub use fetcher::{BulkFetcher, FetchLimits, Sweep};
pub use postgrest::PostgrestSource;

/// A contiguous page of a source ordered by some sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
  pub offset: usize,
  /// Always positive; `FetchWindow::new` clamps zero to one.
  pub limit: usize,
}

impl FetchWindow {
  pub fn new(offset: usize, limit: usize) -> Self {
    Self {
      offset,
      limit: limit.max(1),
    }
  }

  /// Inclusive index of the last row in the window.
  pub fn last(&self) -> usize {
    self.offset + self.limit - 1
  }
}

/// A remote source of named, sortable tables.
///
/// Implementations return rows ordered ascending by `sort_key` and an empty
/// page when the window starts beyond the end of the data.
#[async_trait]
pub trait TabularSource: Send + Sync + 'static {
  async fn fetch_range<R: Record>(
    &self,
    collection: &str,
    sort_key: &str,
    window: FetchWindow,
  ) -> Result<Vec<R>, SourceError>;
}

#[async_trait]
impl<T: TabularSource> TabularSource for Arc<T> {
  async fn fetch_range<R: Record>(
    &self,
    collection: &str,
    sort_key: &str,
    window: FetchWindow,
  ) -> Result<Vec<R>, SourceError> {
    (**self).fetch_range(collection, sort_key, window).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_window_last_is_inclusive() {
    assert_eq!(FetchWindow::new(0, 50).last(), 49);
    assert_eq!(FetchWindow::new(1000, 1000).last(), 1999);
  }

  #[test]
  fn test_zero_limit_is_clamped() {
    assert_eq!(FetchWindow::new(10, 0).limit, 1);
  }
}
