//! In-memory tabular source for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::{FetchWindow, TabularSource};
use crate::cache::Record;
use crate::error::SourceError;

/// A page request seen by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub collection: String,
  pub sort_key: String,
  pub window: FetchWindow,
}

/// Serves pre-ordered rows and records every window it is asked for.
#[derive(Default)]
pub struct InMemorySource {
  tables: Mutex<HashMap<String, Vec<Value>>>,
  failures: Mutex<HashMap<String, (usize, String)>>,
  requests: Mutex<Vec<Request>>,
  latency: Option<Duration>,
}

impl InMemorySource {
  pub fn with_table<T: Serialize>(self, name: &str, rows: impl IntoIterator<Item = T>) -> Self {
    self.set_table(name, rows);
    self
  }

  /// Replace a table's rows.
  pub fn set_table<T: Serialize>(&self, name: &str, rows: impl IntoIterator<Item = T>) {
    let rows = rows
      .into_iter()
      .map(|row| serde_json::to_value(row).unwrap())
      .collect();
    self.tables.lock().unwrap().insert(name.to_string(), rows);
  }

  /// Fail every request for `name` whose window starts at or after `offset`.
  pub fn fail_from_offset(self, name: &str, offset: usize, message: &str) -> Self {
    self
      .failures
      .lock()
      .unwrap()
      .insert(name.to_string(), (offset, message.to_string()));
    self
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  fn slice(&self, collection: &str, window: FetchWindow) -> Result<Vec<Value>, SourceError> {
    if let Some((offset, message)) = self.failures.lock().unwrap().get(collection) {
      if window.offset >= *offset {
        return Err(SourceError::Remote {
          collection: collection.to_string(),
          status: 503,
          message: message.clone(),
        });
      }
    }

    let tables = self.tables.lock().unwrap();
    let rows = tables.get(collection).ok_or_else(|| SourceError::Remote {
      collection: collection.to_string(),
      status: 404,
      message: format!("relation \"{}\" does not exist", collection),
    })?;

    Ok(
      rows
        .iter()
        .skip(window.offset)
        .take(window.limit)
        .cloned()
        .collect(),
    )
  }
}

#[async_trait]
impl TabularSource for InMemorySource {
  async fn fetch_range<R: Record>(
    &self,
    collection: &str,
    sort_key: &str,
    window: FetchWindow,
  ) -> Result<Vec<R>, SourceError> {
    self.requests.lock().unwrap().push(Request {
      collection: collection.to_string(),
      sort_key: sort_key.to_string(),
      window,
    });
    let rows = self.slice(collection, window);

    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
    rows?
      .into_iter()
      .map(|row| {
        serde_json::from_value(row).map_err(|e| SourceError::Decode {
          collection: collection.to_string(),
          message: e.to_string(),
        })
      })
      .collect()
  }
}
