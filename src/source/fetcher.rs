//! Bounded first pages and paginated full sweeps over a `TabularSource`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use super::{FetchWindow, TabularSource};
use crate::cache::Record;
use crate::error::SourceError;

/// Paging limits for the fetch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
  /// Rows requested per page during a full sweep
  pub page_size: usize,
  /// Hard cap on pages per sweep
  pub max_pages: usize,
}

impl Default for FetchLimits {
  fn default() -> Self {
    Self {
      page_size: 1000,
      max_pages: 50,
    }
  }
}

/// Result of a full sweep.
#[derive(Debug, Clone)]
pub struct Sweep<R> {
  /// Records in source order, pages concatenated in request order
  pub records: Vec<R>,
  /// Number of pages requested
  pub pages: usize,
  /// The page cap was hit with the last page still full, so the source may
  /// hold more rows than were returned.
  pub truncated: bool,
}

/// Paginated reader over a tabular source.
pub struct BulkFetcher<S> {
  source: Arc<S>,
  limits: FetchLimits,
}

impl<S> Clone for BulkFetcher<S> {
  fn clone(&self) -> Self {
    Self {
      source: Arc::clone(&self.source),
      limits: self.limits,
    }
  }
}

impl<S: TabularSource> BulkFetcher<S> {
  pub fn new(source: S, limits: FetchLimits) -> Self {
    Self {
      source: Arc::new(source),
      limits: FetchLimits {
        page_size: limits.page_size.max(1),
        max_pages: limits.max_pages.max(1),
      },
    }
  }

  /// Fetch exactly one page ordered ascending by `sort_key`.
  pub async fn fetch_page<R: Record>(
    &self,
    collection: &str,
    sort_key: &str,
    window: FetchWindow,
  ) -> Result<Vec<R>, SourceError> {
    let page = self
      .source
      .fetch_range(collection, sort_key, window)
      .await
      .inspect_err(|e| error!(collection, offset = window.offset, error = %e, "page fetch failed"))?;

    debug!(
      collection,
      offset = window.offset,
      last = window.last(),
      rows = page.len(),
      "fetched page"
    );
    Ok(page)
  }

  /// First page of a collection, for a fast first paint.
  pub async fn fetch_initial<R: Record>(
    &self,
    collection: &str,
    sort_key: &str,
    limit: usize,
  ) -> Result<Vec<R>, SourceError> {
    self
      .fetch_page(collection, sort_key, FetchWindow::new(0, limit))
      .await
  }

  /// Sweep the whole collection page by page.
  ///
  /// Stops at the first short page or after `max_pages` pages. Any page
  /// failure aborts the sweep; there are no retries at this layer.
  pub async fn fetch_all<R: Record>(
    &self,
    collection: &str,
    sort_key: &str,
  ) -> Result<Sweep<R>, SourceError> {
    let FetchLimits {
      page_size,
      max_pages,
    } = self.limits;
    let started = Instant::now();
    let mut records = Vec::new();
    let mut offset = 0;

    for page in 1..=max_pages {
      let batch: Vec<R> = self
        .fetch_page(collection, sort_key, FetchWindow::new(offset, page_size))
        .await?;
      let batch_len = batch.len();
      records.extend(batch);

      if batch_len < page_size {
        debug!(
          collection,
          pages = page,
          records = records.len(),
          elapsed_ms = started.elapsed().as_millis() as u64,
          "sweep complete"
        );
        return Ok(Sweep {
          records,
          pages: page,
          truncated: false,
        });
      }
      offset += page_size;
    }

    warn!(
      collection,
      pages = max_pages,
      records = records.len(),
      "sweep hit the page cap, result may be truncated"
    );
    Ok(Sweep {
      records,
      pages: max_pages,
      truncated: true,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::memory::InMemorySource;

  fn fetcher_with_rows(count: u64) -> BulkFetcher<InMemorySource> {
    let source = InMemorySource::default().with_table("demo", 1..=count);
    BulkFetcher::new(source, FetchLimits::default())
  }

  #[tokio::test]
  async fn test_sweep_returns_everything_in_order() {
    let fetcher = fetcher_with_rows(2500);

    let sweep: Sweep<u64> = fetcher.fetch_all("demo", "id").await.unwrap();

    assert_eq!(sweep.records, (1..=2500).collect::<Vec<_>>());
    assert_eq!(sweep.pages, 3);
    assert!(!sweep.truncated);
  }

  #[tokio::test]
  async fn test_sweep_advances_offset_by_page_size() {
    let fetcher = fetcher_with_rows(2500);

    let _: Sweep<u64> = fetcher.fetch_all("demo", "id").await.unwrap();

    let windows: Vec<FetchWindow> = fetcher
      .source
      .requests()
      .into_iter()
      .map(|r| r.window)
      .collect();
    assert_eq!(
      windows,
      vec![
        FetchWindow::new(0, 1000),
        FetchWindow::new(1000, 1000),
        FetchWindow::new(2000, 1000),
      ]
    );
  }

  #[tokio::test]
  async fn test_exact_multiple_needs_one_empty_page() {
    let fetcher = fetcher_with_rows(2000);

    let sweep: Sweep<u64> = fetcher.fetch_all("demo", "id").await.unwrap();

    assert_eq!(sweep.records.len(), 2000);
    assert_eq!(sweep.pages, 3);
    assert!(!sweep.truncated);
  }

  #[tokio::test]
  async fn test_sweep_stops_at_page_cap() {
    let fetcher = fetcher_with_rows(50_500);

    let sweep: Sweep<u64> = fetcher.fetch_all("demo", "id").await.unwrap();

    assert_eq!(sweep.pages, 50);
    assert!(sweep.truncated);
    assert_eq!(sweep.records, (1..=50_000).collect::<Vec<_>>());
    assert_eq!(fetcher.source.requests().len(), 50);
  }

  #[tokio::test]
  async fn test_source_exactly_at_cap_is_flagged() {
    // The sweep cannot tell a full last page from a longer source.
    let fetcher = fetcher_with_rows(50_000);

    let sweep: Sweep<u64> = fetcher.fetch_all("demo", "id").await.unwrap();

    assert_eq!(sweep.records.len(), 50_000);
    assert!(sweep.truncated);
  }

  #[tokio::test]
  async fn test_empty_collection() {
    let source = InMemorySource::default().with_table("empty", Vec::<u64>::new());
    let fetcher = BulkFetcher::new(source, FetchLimits::default());

    let page: Vec<u64> = fetcher
      .fetch_page("empty", "id", FetchWindow::new(0, 50))
      .await
      .unwrap();
    assert!(page.is_empty());

    let sweep: Sweep<u64> = fetcher.fetch_all("empty", "id").await.unwrap();
    assert!(sweep.records.is_empty());
    assert_eq!(sweep.pages, 1);
    assert!(!sweep.truncated);
  }

  #[tokio::test]
  async fn test_window_past_end_is_empty() {
    let fetcher = fetcher_with_rows(10);

    let page: Vec<u64> = fetcher
      .fetch_page("demo", "id", FetchWindow::new(100, 50))
      .await
      .unwrap();

    assert!(page.is_empty());
  }

  #[tokio::test]
  async fn test_initial_page_is_bounded() {
    let fetcher = fetcher_with_rows(500);

    let page: Vec<u64> = fetcher.fetch_initial("demo", "id", 50).await.unwrap();

    assert_eq!(page, (1..=50).collect::<Vec<_>>());
    assert_eq!(
      fetcher.source.requests()[0].window,
      FetchWindow::new(0, 50)
    );
  }

  #[tokio::test]
  async fn test_failed_page_aborts_sweep() {
    let source = InMemorySource::default()
      .with_table("demo", 1..=3000u64)
      .fail_from_offset("demo", 1000, "connection reset");
    let fetcher = BulkFetcher::new(source, FetchLimits::default());

    let err = fetcher.fetch_all::<u64>("demo", "id").await.unwrap_err();

    assert!(err.to_string().contains("connection reset"));
    assert_eq!(fetcher.source.requests().len(), 2);
  }
}
