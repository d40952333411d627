//! PostgREST (Supabase) tabular source.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{FetchWindow, TabularSource};
use crate::cache::Record;
use crate::config::{Config, SourceConfig};
use crate::error::SourceError;

/// Error body returned by PostgREST on failed requests.
#[derive(Debug, Deserialize)]
struct ApiError {
  message: Option<String>,
  details: Option<String>,
}

/// HTTP client for a PostgREST endpoint.
#[derive(Clone)]
pub struct PostgrestSource {
  http: reqwest::Client,
  base: Url,
}

impl PostgrestSource {
  pub fn new(config: &SourceConfig) -> Result<Self> {
    let base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid source url '{}': {}", config.url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Source url '{}' cannot be used as a base", config.url));
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(key) = Config::get_api_key() {
      let apikey =
        HeaderValue::from_str(&key).map_err(|e| eyre!("API key is not a valid header: {}", e))?;
      let bearer = HeaderValue::from_str(&format!("Bearer {}", key))
        .map_err(|e| eyre!("API key is not a valid header: {}", e))?;
      headers.insert("apikey", apikey);
      headers.insert(AUTHORIZATION, bearer);
    }
    if let Some(schema) = &config.schema {
      let profile = HeaderValue::from_str(schema)
        .map_err(|e| eyre!("Schema '{}' is not a valid header: {}", schema, e))?;
      headers.insert("Accept-Profile", profile);
    }

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base })
  }

  fn table_url(&self, collection: &str, sort_key: &str, window: FetchWindow) -> Url {
    table_url(&self.base, collection, sort_key, window)
  }
}

/// Build the ranged select URL for one page.
fn table_url(base: &Url, collection: &str, sort_key: &str, window: FetchWindow) -> Url {
  let mut url = base.clone();
  if let Ok(mut segments) = url.path_segments_mut() {
    segments.pop_if_empty().extend(["rest", "v1", collection]);
  }
  url
    .query_pairs_mut()
    .append_pair("select", "*")
    .append_pair("order", &order_clause(sort_key))
    .append_pair("offset", &window.offset.to_string())
    .append_pair("limit", &window.limit.to_string());
  url
}

/// Ascending order clause; column names outside `[A-Za-z0-9_]` are quoted.
fn order_clause(sort_key: &str) -> String {
  let plain = sort_key
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || c == '_');
  if plain {
    format!("{}.asc", sort_key)
  } else {
    format!("\"{}\".asc", sort_key.replace('"', "\\\""))
  }
}

/// Pull the most useful message out of an error body.
fn remote_message(status: StatusCode, body: &str) -> String {
  match serde_json::from_str::<ApiError>(body) {
    Ok(ApiError {
      message: Some(message),
      details,
    }) => match details {
      Some(details) if !details.is_empty() => format!("{} ({})", message, details),
      _ => message,
    },
    _ if !body.trim().is_empty() => body.trim().to_string(),
    _ => status
      .canonical_reason()
      .unwrap_or("unknown error")
      .to_string(),
  }
}

#[async_trait]
impl TabularSource for PostgrestSource {
  async fn fetch_range<R: Record>(
    &self,
    collection: &str,
    sort_key: &str,
    window: FetchWindow,
  ) -> Result<Vec<R>, SourceError> {
    let transport = |e: reqwest::Error| SourceError::Transport {
      collection: collection.to_string(),
      message: e.to_string(),
    };

    let response = self
      .http
      .get(self.table_url(collection, sort_key, window))
      .send()
      .await
      .map_err(transport)?;
    let status = response.status();

    // Offsets past the end may be answered with 416 instead of an empty array
    if status == StatusCode::RANGE_NOT_SATISFIABLE {
      return Ok(Vec::new());
    }
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(SourceError::Remote {
        collection: collection.to_string(),
        status: status.as_u16(),
        message: remote_message(status, &body),
      });
    }

    let body = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&body).map_err(|e| SourceError::Decode {
      collection: collection.to_string(),
      message: e.to_string(),
    })
  }
}
