//! Polled collection hook over the cache layer.
//!
//! `CollectionQuery<S, R>` is what a view holds for one collection: it starts
//! a load, receives the first data (cached snapshot or first page) and later
//! the full sweep, and exposes the current state without blocking.
//!
//! # Example
//!
//! ```ignore
//! let mut query = CollectionQuery::new(layer.clone(), "LLD - Lei de Lavagem de Dinheiro", "id");
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! if query.is_loading_initial() {
//!     render_spinner();
//! } else if let Some(articles) = query.data() {
//!     render_articles(articles);
//! }
//! ```

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::cache::{CacheLayer, LoadOrigin, Record};
use crate::source::TabularSource;

/// The state of a collection query
#[derive(Debug, Clone)]
pub enum QueryState<R> {
  /// Query has not been started
  Idle,
  /// Waiting for the first data
  Loading,
  /// Data is available; a full sweep may still be on its way
  Ready { records: Vec<R>, origin: LoadOrigin },
  /// The first data could not be loaded
  Error(String),
}

/// Messages from the load task to the query
enum Update<R> {
  Loaded {
    records: Vec<R>,
    origin: LoadOrigin,
    /// Whether this load scheduled (or joined) a sweep that will report back
    refreshing: bool,
  },
  Failed(String),
  Refreshed { records: Vec<R>, truncated: bool },
  /// The background sweep ended without new data
  RefreshSettled,
}

/// Cached collection query with first-page and full-sweep delivery.
pub struct CollectionQuery<S, R> {
  layer: CacheLayer<S, R>,
  key: String,
  sort_key: String,
  state: QueryState<R>,
  receiver: Option<mpsc::UnboundedReceiver<Update<R>>>,
  refreshing: bool,
}

impl<S: TabularSource, R: Record> CollectionQuery<S, R> {
  pub fn new(layer: CacheLayer<S, R>, key: &str, sort_key: &str) -> Self {
    Self {
      layer,
      key: key.to_string(),
      sort_key: sort_key.to_string(),
      state: QueryState::Idle,
      receiver: None,
      refreshing: false,
    }
  }

  pub fn state(&self) -> &QueryState<R> {
    &self.state
  }

  /// Current records, if any have arrived.
  pub fn data(&self) -> Option<&[R]> {
    match &self.state {
      QueryState::Ready { records, .. } => Some(records),
      _ => None,
    }
  }

  pub fn origin(&self) -> Option<LoadOrigin> {
    match &self.state {
      QueryState::Ready { origin, .. } => Some(*origin),
      _ => None,
    }
  }

  /// True until the first data (or an error) arrives.
  pub fn is_loading_initial(&self) -> bool {
    matches!(self.state, QueryState::Loading)
  }

  /// True while a background sweep for this query is pending.
  pub fn is_refreshing(&self) -> bool {
    self.refreshing
  }

  pub fn error(&self) -> Option<&str> {
    match &self.state {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }

  /// Start loading if not already loading.
  pub fn fetch(&mut self) {
    if self.is_loading_initial() || self.refreshing {
      return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let layer = self.layer.clone();
    let key = self.key.clone();
    let sort_key = self.sort_key.clone();

    tokio::spawn(async move {
      let load = match layer.load(&key, &sort_key).await {
        Ok(load) => load,
        Err(e) => {
          let _ = tx.send(Update::Failed(e.to_string()));
          return;
        }
      };

      // Ignore send errors - the query may have been dropped
      let _ = tx.send(Update::Loaded {
        records: load.records,
        origin: load.origin,
        refreshing: load.refresh.is_some(),
      });

      if let Some(refresh) = load.refresh {
        let update = match refresh.wait().await {
          Ok(sweep) => Update::Refreshed {
            records: sweep.records.clone(),
            truncated: sweep.truncated,
          },
          Err(_) => Update::RefreshSettled,
        };
        let _ = tx.send(update);
      }
    });
  }

  /// Poll for results from a pending load.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Some(receiver) = self.receiver.as_mut() {
      match receiver.try_recv() {
        Ok(update) => {
          self.apply(update);
          changed = true;
        }
        Err(TryRecvError::Empty) => break,
        Err(TryRecvError::Disconnected) => {
          // The load task is gone; nothing else will arrive
          self.receiver = None;
          changed |= self.refreshing;
          self.refreshing = false;
        }
      }
    }
    changed
  }

  /// Wait for the next update. Returns `false` once nothing more will arrive.
  pub async fn changed(&mut self) -> bool {
    let Some(receiver) = self.receiver.as_mut() else {
      return false;
    };
    match receiver.recv().await {
      Some(update) => {
        self.apply(update);
        true
      }
      None => {
        self.receiver = None;
        self.refreshing = false;
        false
      }
    }
  }

  fn apply(&mut self, update: Update<R>) {
    match update {
      Update::Loaded {
        records,
        origin,
        refreshing,
      } => {
        self.refreshing = refreshing;
        self.state = QueryState::Ready { records, origin };
      }
      Update::Failed(error) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
      }
      Update::Refreshed { records, truncated } => {
        self.state = QueryState::Ready {
          records,
          origin: LoadOrigin::FullSweep { truncated },
        };
        self.refreshing = false;
      }
      Update::RefreshSettled => {
        self.refreshing = false;
      }
    }
  }

  /// Drop the cached snapshot for this collection and forget current data.
  pub async fn clear_cache(&mut self) {
    self.layer.cache().delete(&self.key).await;
    self.receiver = None;
    self.refreshing = false;
    self.state = QueryState::Idle;
  }

  /// Store `records` as this collection's snapshot.
  pub async fn save_to_cache(&self, records: &[R]) -> bool {
    self.layer.cache().put(&self.key, records).await.is_some()
  }
}
