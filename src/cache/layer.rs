//! Cache layer that orchestrates caching logic with network fetching.

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::local::LocalCache;
use super::traits::{LoadOrigin, Record};
use crate::error::LoadError;
use crate::source::{BulkFetcher, Sweep, TabularSource};

/// Outcome of a background full sweep.
pub type SweepResult<R> = Result<Arc<Sweep<R>>, LoadError>;

/// Tuning for the load policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSettings {
  /// Rows in the first page served on a cache miss
  pub initial_limit: usize,
  /// Pause before the background full sweep starts
  pub refresh_delay: Duration,
  /// Also sweep in the background after serving a fresh cache hit
  pub refresh_on_hit: bool,
}

impl Default for LoaderSettings {
  fn default() -> Self {
    Self {
      initial_limit: 50,
      refresh_delay: Duration::from_millis(100),
      refresh_on_hit: false,
    }
  }
}

/// Awaitable handle on a background full sweep.
///
/// Clones share the same sweep; awaiting never starts a second one.
pub struct RefreshHandle<R> {
  result: Shared<BoxFuture<'static, SweepResult<R>>>,
}

impl<R> Clone for RefreshHandle<R> {
  fn clone(&self) -> Self {
    Self {
      result: self.result.clone(),
    }
  }
}

impl<R: Record> RefreshHandle<R> {
  /// Wait for the sweep (and its cache write) to finish.
  pub async fn wait(self) -> SweepResult<R> {
    self.result.await
  }
}

/// What a load hands back to the caller.
pub struct Load<R> {
  pub records: Vec<R>,
  pub origin: LoadOrigin,
  /// The background sweep scheduled by this load, if any
  pub refresh: Option<RefreshHandle<R>>,
}

struct Inner<S, R> {
  fetcher: BulkFetcher<S>,
  cache: Arc<LocalCache>,
  settings: LoaderSettings,
  /// One pending sweep per collection
  inflight: Mutex<HashMap<String, RefreshHandle<R>>>,
  shutdown: watch::Sender<bool>,
}

/// Cache layer that manages the load policy and background refreshes.
///
/// A fresh cached snapshot is served as is. Otherwise the first page is
/// fetched for the caller and a full sweep is scheduled in the background;
/// the sweep result replaces the cached snapshot when it lands.
pub struct CacheLayer<S, R> {
  inner: Arc<Inner<S, R>>,
}

impl<S, R> Clone for CacheLayer<S, R> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<S: TabularSource, R: Record> CacheLayer<S, R> {
  pub fn new(fetcher: BulkFetcher<S>, cache: Arc<LocalCache>, settings: LoaderSettings) -> Self {
    let (shutdown, _) = watch::channel(false);
    Self {
      inner: Arc::new(Inner {
        fetcher,
        cache,
        settings,
        inflight: Mutex::new(HashMap::new()),
        shutdown,
      }),
    }
  }

  pub fn cache(&self) -> &LocalCache {
    &self.inner.cache
  }

  /// Load a collection.
  ///
  /// 1. Fresh, non-empty cache entry - return it, no network call
  /// 2. Stale entry - evict it and fall through
  /// 3. Fetch the first page and return it
  /// 4. Schedule a full sweep that rewrites the cache
  ///
  /// Only a failed first page is an error; sweep failures are logged.
  pub async fn load(&self, key: &str, sort_key: &str) -> Result<Load<R>, LoadError> {
    if *self.inner.shutdown.borrow() {
      return Err(LoadError::Cancelled);
    }

    let cached = self.inner.cache.get::<R>(key).await;
    let previous_digest = cached.as_ref().map(|entry| entry.digest.clone());

    if let Some(entry) = cached {
      if !self.inner.cache.is_fresh(&entry) {
        debug!(collection = key, stored_at = %entry.stored_at, "cache entry expired, evicting");
        self.inner.cache.delete(key).await;
      } else if entry.records.is_empty() {
        debug!(collection = key, "cached snapshot is empty, treating as miss");
      } else {
        info!(collection = key, records = entry.records.len(), "serving fresh cache");
        let refresh = self
          .inner
          .settings
          .refresh_on_hit
          .then(|| self.schedule_refresh(key, sort_key, previous_digest));
        return Ok(Load {
          records: entry.records,
          origin: LoadOrigin::Cache {
            stored_at: entry.stored_at,
          },
          refresh,
        });
      }
    }

    let records = self
      .inner
      .fetcher
      .fetch_initial(key, sort_key, self.inner.settings.initial_limit)
      .await?;
    info!(collection = key, records = records.len(), "serving first page");

    let refresh = self.schedule_refresh(key, sort_key, previous_digest);
    Ok(Load {
      records,
      origin: LoadOrigin::InitialPage,
      refresh: Some(refresh),
    })
  }

  /// Start a background full sweep for `key`, or join the one in flight.
  pub fn refresh(&self, key: &str, sort_key: &str) -> RefreshHandle<R> {
    self.schedule_refresh(key, sort_key, None)
  }

  fn schedule_refresh(
    &self,
    key: &str,
    sort_key: &str,
    previous_digest: Option<String>,
  ) -> RefreshHandle<R> {
    let mut inflight = self.inner.inflight();
    if let Some(pending) = inflight.get(key) {
      debug!(collection = key, "joining in-flight refresh");
      return pending.clone();
    }

    let inner = Arc::clone(&self.inner);
    let shutdown = self.inner.shutdown.subscribe();
    let task_key = key.to_string();
    let sort_key = sort_key.to_string();

    // The task removes its own entry; it cannot do so before we insert it
    // because we hold the map lock until then.
    let task = tokio::spawn(async move {
      let result = inner
        .sweep(&task_key, &sort_key, previous_digest, shutdown)
        .await;
      inner.inflight().remove(&task_key);
      result
    });

    let result = async move {
      task.await.unwrap_or_else(|e| {
        error!(error = %e, "refresh task failed");
        Err(LoadError::Cancelled)
      })
    }
    .boxed()
    .shared();

    let handle = RefreshHandle { result };
    inflight.insert(key.to_string(), handle.clone());
    handle
  }

  pub fn is_refreshing(&self, key: &str) -> bool {
    self.inner.inflight().contains_key(key)
  }

  /// Wait until no background sweep is pending.
  pub async fn wait_idle(&self) {
    loop {
      let pending: Vec<RefreshHandle<R>> = self.inner.inflight().values().cloned().collect();
      if pending.is_empty() {
        return;
      }
      join_all(pending.into_iter().map(RefreshHandle::wait)).await;
    }
  }

  /// Cancel pending sweeps and wait for them to wind down.
  ///
  /// Later loads fail with `LoadError::Cancelled`.
  pub async fn shutdown(&self) {
    self.inner.shutdown.send_replace(true);
    self.wait_idle().await;
  }
}

impl<S: TabularSource, R: Record> Inner<S, R> {
  fn inflight(&self) -> MutexGuard<'_, HashMap<String, RefreshHandle<R>>> {
    self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn sweep(
    &self,
    key: &str,
    sort_key: &str,
    previous_digest: Option<String>,
    shutdown: watch::Receiver<bool>,
  ) -> SweepResult<R> {
    // Only the delay and the fetch are cancellable; a started cache write
    // always finishes.
    let fetched = tokio::select! {
      _ = cancelled(shutdown.clone()) => {
        debug!(collection = key, "refresh cancelled");
        return Err(LoadError::Cancelled);
      }
      fetched = async {
        tokio::time::sleep(self.settings.refresh_delay).await;
        self.fetcher.fetch_all::<R>(key, sort_key).await
      } => fetched,
    };
    let sweep = fetched.map_err(|e| {
      warn!(collection = key, error = %e, "background refresh failed, cache left as is");
      LoadError::from(e)
    })?;

    if *shutdown.borrow() {
      debug!(collection = key, "refresh cancelled before cache write");
      return Err(LoadError::Cancelled);
    }

    match self.cache.put(key, &sweep.records).await {
      Some(digest) if previous_digest.as_deref() == Some(digest.as_str()) => {
        info!(collection = key, records = sweep.records.len(), "collection unchanged");
      }
      Some(_) => {
        info!(
          collection = key,
          records = sweep.records.len(),
          pages = sweep.pages,
          truncated = sweep.truncated,
          "collection refreshed"
        );
      }
      None => {
        debug!(collection = key, "refreshed collection not cached");
      }
    }

    Ok(Arc::new(sweep))
  }
}

/// Resolves once shutdown is signalled.
async fn cancelled(mut shutdown: watch::Receiver<bool>) {
  // The sender lives in `Inner`, which every task keeps alive
  let _ = shutdown.wait_for(|stop| *stop).await;
}
