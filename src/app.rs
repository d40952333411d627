use crate::cache::{CacheLayer, LoadOrigin, LocalCache, Record};
use crate::commands::Command;
use crate::config::Config;
use crate::query::{CollectionQuery, QueryState};
use crate::source::{BulkFetcher, PostgrestSource, TabularSource};
use crate::statute::{self, Article};
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};

/// How often the playlist loop polls for updates
const TICK: Duration = Duration::from_millis(100);

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Loader over the statute source
  layer: CacheLayer<PostgrestSource, Article>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let source = PostgrestSource::new(&config.source)?;
    let cache = LocalCache::new(
      config.store_location()?,
      config.cache.schema_version,
      config.ttl(),
    );
    let layer = CacheLayer::new(
      BulkFetcher::new(source, config.fetch_limits()),
      Arc::new(cache),
      config.loader_settings(),
    );

    Ok(Self { config, layer })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    let span = info_span!("command", collection = command.collection());
    let result = self.dispatch(command).instrument(span).await;

    settle_refreshes(&self.layer, interrupted()).await;
    self.layer.cache().close().await;
    result
  }

  async fn dispatch(&self, command: Command) -> Result<()> {
    match command {
      Command::Read {
        collection,
        search,
        limit,
        no_wait,
      } => {
        self
          .read(&collection, search.as_deref().unwrap_or(""), limit, !no_wait)
          .await
      }
      Command::Playlist { collection } => self.playlist(&collection).await,
      Command::Refresh { collection } => self.refresh(&collection).await,
      Command::Import { collection, file } => self.import(&collection, &file).await,
      Command::Clear { collection } => {
        self.query(&collection).clear_cache().await;
        println!("Cleared {}", collection);
        Ok(())
      }
      Command::Status { collection } => self.status(&collection).await,
      Command::Purge => {
        self.layer.cache().clear_all().await;
        println!("Cache purged");
        Ok(())
      }
    }
  }

  fn query(&self, collection: &str) -> CollectionQuery<PostgrestSource, Article> {
    CollectionQuery::new(self.layer.clone(), collection, &self.config.source.sort_key)
  }

  async fn read(&self, collection: &str, search: &str, limit: usize, wait: bool) -> Result<()> {
    let mut query = self.query(collection);
    query.fetch();
    query.changed().await;

    if let Some(e) = query.error() {
      return Err(eyre!("Failed to load {}: {}", collection, e));
    }

    if wait && query.is_refreshing() {
      if let Some(articles) = query.data() {
        eprintln!(
          "Showing first {} articles, fetching the rest...",
          articles.len()
        );
      }

      let interrupted = tokio::select! {
        _ = async { while query.is_refreshing() && query.changed().await {} } => false,
        _ = tokio::signal::ctrl_c() => true,
      };
      if interrupted {
        info!("interrupted, cancelling background refresh");
        self.layer.shutdown().await;
      }
    }

    let Some(articles) = query.data() else {
      return Err(eyre!("No data for {}", collection));
    };
    let shown = statute::display_window(articles, search, limit);
    for article in &shown {
      print_article(article);
    }
    eprintln!(
      "{} of {} articles ({})",
      shown.len(),
      articles.len(),
      describe_origin(query.origin())
    );
    Ok(())
  }

  /// Poll the query on a tick until the full collection is in, as a view
  /// would from its event loop.
  async fn playlist(&self, collection: &str) -> Result<()> {
    let mut query = self.query(collection);
    query.fetch();

    let mut ticker = tokio::time::interval(TICK);
    loop {
      tokio::select! {
        _ = ticker.tick() => {}
        _ = tokio::signal::ctrl_c() => {
          info!("interrupted, cancelling background refresh");
          self.layer.shutdown().await;
          break;
        }
      }
      if query.poll() && !query.is_loading_initial() && !query.is_refreshing() {
        break;
      }
    }

    match query.state() {
      QueryState::Ready { records, .. } => {
        for article in statute::with_narration(records) {
          println!(
            "Art. {}\t{}",
            article.number(),
            article.narration.as_deref().unwrap_or("")
          );
        }
        Ok(())
      }
      QueryState::Error(e) => Err(eyre!("Failed to load {}: {}", collection, e)),
      QueryState::Idle | QueryState::Loading => Ok(()),
    }
  }

  async fn refresh(&self, collection: &str) -> Result<()> {
    let sweep = self
      .layer
      .refresh(collection, &self.config.source.sort_key)
      .wait()
      .await
      .map_err(|e| eyre!("Refresh of {} failed: {}", collection, e))?;

    if sweep.truncated {
      warn!(records = sweep.records.len(), "collection truncated at page cap");
    }
    println!(
      "{}: {} articles in {} pages{}",
      collection,
      sweep.records.len(),
      sweep.pages,
      if sweep.truncated { " (truncated)" } else { "" }
    );
    Ok(())
  }

  async fn import(&self, collection: &str, file: &Path) -> Result<()> {
    let contents = tokio::fs::read(file)
      .await
      .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
    let articles: Vec<Article> = serde_json::from_slice(&contents)
      .map_err(|e| eyre!("{} is not a JSON array of articles: {}", file.display(), e))?;

    if !self.query(collection).save_to_cache(&articles).await {
      return Err(eyre!("Cache is unavailable, nothing was stored"));
    }
    println!("Stored {} articles for {}", articles.len(), collection);
    Ok(())
  }

  async fn status(&self, collection: &str) -> Result<()> {
    let cache = self.layer.cache();
    if !cache.init().await {
      return Err(eyre!("Cache is unavailable"));
    }

    // Decoded loosely so entries stay inspectable whatever their shape
    let Some(entry) = cache.get::<serde_json::Value>(collection).await else {
      println!("{}: not cached", collection);
      return Ok(());
    };

    let age = entry.age_at(Utc::now());
    println!("collection: {}", entry.key);
    println!("stored_at:  {}", entry.stored_at.to_rfc3339());
    println!("age:        {}h {}m", age.num_hours(), age.num_minutes() % 60);
    println!(
      "fresh:      {} (ttl {} days)",
      cache.is_fresh(&entry),
      cache.ttl().num_days()
    );
    println!("records:    {}", entry.records.len());
    println!("digest:     {}", entry.digest);
    Ok(())
  }
}

/// Resolves on Ctrl-C.
async fn interrupted() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "cannot listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
}

/// Let scheduled sweeps finish and land in the cache before exiting.
/// `interrupt` cancels whatever is still pending instead.
async fn settle_refreshes<S: TabularSource, R: Record>(
  layer: &CacheLayer<S, R>,
  interrupt: impl Future<Output = ()>,
) {
  tokio::select! {
    _ = layer.wait_idle() => {}
    _ = interrupt => {
      info!("interrupted, cancelling background refresh");
      layer.shutdown().await;
    }
  }
}

fn describe_origin(origin: Option<LoadOrigin>) -> String {
  match origin {
    Some(LoadOrigin::Cache { stored_at }) => format!("cached {}", stored_at.to_rfc3339()),
    Some(LoadOrigin::InitialPage) => "first page".to_string(),
    Some(LoadOrigin::FullSweep { truncated: true }) => "fetched, truncated".to_string(),
    Some(LoadOrigin::FullSweep { truncated: false }) => "fetched".to_string(),
    None => "no data".to_string(),
  }
}

fn print_article(article: &Article) {
  let text = article.text().trim();
  let first_line = text.lines().next().unwrap_or("");
  println!("Art. {:<8} {}", article.number(), first_line);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{LoaderSettings, StoreLocation};
  use crate::source::memory::InMemorySource;
  use crate::source::FetchLimits;

  fn layer(rows: u64) -> CacheLayer<InMemorySource, u64> {
    CacheLayer::new(
      BulkFetcher::new(
        InMemorySource::default().with_table("demo", 1..=rows),
        FetchLimits::default(),
      ),
      Arc::new(LocalCache::new(
        StoreLocation::Memory,
        2,
        chrono::Duration::days(7),
      )),
      LoaderSettings {
        refresh_delay: Duration::from_millis(50),
        ..LoaderSettings::default()
      },
    )
  }

  #[tokio::test]
  async fn test_exit_waits_for_first_sweep() {
    let layer = layer(1500);
    let load = layer.load("demo", "id").await.unwrap();
    assert_eq!(load.origin, LoadOrigin::InitialPage);

    settle_refreshes(&layer, std::future::pending()).await;

    let entry = layer.cache().get::<u64>("demo").await.unwrap();
    assert_eq!(entry.records.len(), 1500);
    assert!(!layer.is_refreshing("demo"));
  }

  #[tokio::test]
  async fn test_interrupt_cancels_pending_sweep() {
    let layer = layer(1500);
    layer.load("demo", "id").await.unwrap();

    settle_refreshes(&layer, async {}).await;

    assert!(layer.cache().get::<u64>("demo").await.is_none());
    assert!(!layer.is_refreshing("demo"));
  }

  #[test]
  fn test_describe_origin() {
    assert_eq!(describe_origin(Some(LoadOrigin::InitialPage)), "first page");
    assert_eq!(
      describe_origin(Some(LoadOrigin::FullSweep { truncated: true })),
      "fetched, truncated"
    );
    assert_eq!(describe_origin(None), "no data");
  }
}
