use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{LoaderSettings, StoreLocation, DEFAULT_TTL_DAYS};
use crate::source::FetchLimits;

const IN_MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub source: SourceConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub loader: LoaderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
  /// Project URL of the PostgREST/Supabase endpoint
  pub url: String,
  /// Database schema to read from (sent as Accept-Profile)
  pub schema: Option<String>,
  /// Column every collection is ordered by
  #[serde(default = "default_sort_key")]
  pub sort_key: String,
}

fn default_sort_key() -> String {
  "id".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// Database file (defaults to $XDG_DATA_HOME/vademecum/cache.db);
  /// `:memory:` keeps the cache for the life of the process only
  pub path: Option<PathBuf>,
  pub ttl_days: i64,
  /// Bumping this clears every cached collection on next open
  pub schema_version: u32,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      ttl_days: DEFAULT_TTL_DAYS,
      schema_version: 2,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
  pub initial_limit: usize,
  pub page_size: usize,
  pub max_pages: usize,
  pub refresh_delay_ms: u64,
  pub refresh_on_hit: bool,
}

impl Default for LoaderConfig {
  fn default() -> Self {
    let settings = LoaderSettings::default();
    let limits = FetchLimits::default();
    Self {
      initial_limit: settings.initial_limit,
      page_size: limits.page_size,
      max_pages: limits.max_pages,
      refresh_delay_ms: settings.refresh_delay.as_millis() as u64,
      refresh_on_hit: settings.refresh_on_hit,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vademecum.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vademecum/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/vademecum/config.yaml\n\
                 with at least a `source.url` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("vademecum.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vademecum").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.source.url.trim().is_empty() {
      return Err(eyre!("source.url must not be empty"));
    }
    if self.source.sort_key.trim().is_empty() {
      return Err(eyre!("source.sort_key must not be empty"));
    }
    if self.cache.ttl_days <= 0 {
      return Err(eyre!("cache.ttl_days must be positive"));
    }
    if self.cache.schema_version == 0 {
      return Err(eyre!("cache.schema_version must be at least 1"));
    }
    if self.loader.initial_limit == 0 {
      return Err(eyre!("loader.initial_limit must be positive"));
    }
    if self.loader.page_size == 0 {
      return Err(eyre!("loader.page_size must be positive"));
    }
    if self.loader.max_pages == 0 {
      return Err(eyre!("loader.max_pages must be positive"));
    }
    Ok(())
  }

  /// Where the cache database lives, or `Disabled`.
  pub fn store_location(&self) -> Result<StoreLocation> {
    if !self.cache.enabled {
      return Ok(StoreLocation::Disabled);
    }
    match &self.cache.path {
      Some(path) if path.as_os_str() == IN_MEMORY_PATH => Ok(StoreLocation::Memory),
      Some(path) => Ok(StoreLocation::File(path.clone())),
      None => Ok(StoreLocation::File(Self::data_dir()?.join("cache.db"))),
    }
  }

  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::days(self.cache.ttl_days)
  }

  pub fn fetch_limits(&self) -> FetchLimits {
    FetchLimits {
      page_size: self.loader.page_size,
      max_pages: self.loader.max_pages,
    }
  }

  pub fn loader_settings(&self) -> LoaderSettings {
    LoaderSettings {
      initial_limit: self.loader.initial_limit,
      refresh_delay: Duration::from_millis(self.loader.refresh_delay_ms),
      refresh_on_hit: self.loader.refresh_on_hit,
    }
  }

  /// Application data directory (cache database and logs).
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("vademecum"))
  }

  /// Get the source API key from environment variables.
  ///
  /// Checks VADEMECUM_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Option<String> {
    std::env::var("VADEMECUM_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .ok()
      .filter(|key| !key.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("source:\n  url: https://abc.supabase.co\n").unwrap();

    assert_eq!(config.source.sort_key, "id");
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl_days, 7);
    assert_eq!(config.cache.schema_version, 2);
    assert_eq!(config.fetch_limits(), FetchLimits::default());
    assert_eq!(config.loader_settings(), LoaderSettings::default());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
source:
  url: https://abc.supabase.co
  schema: public
  sort_key: ordem
cache:
  enabled: true
  path: /tmp/vm/cache.db
  ttl_days: 3
  schema_version: 5
loader:
  initial_limit: 100
  page_size: 500
  max_pages: 10
  refresh_delay_ms: 0
  refresh_on_hit: true
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.source.schema.as_deref(), Some("public"));
    assert_eq!(config.ttl(), chrono::Duration::days(3));
    assert_eq!(
      config.store_location().unwrap(),
      StoreLocation::File(PathBuf::from("/tmp/vm/cache.db"))
    );
    assert_eq!(
      config.fetch_limits(),
      FetchLimits {
        page_size: 500,
        max_pages: 10
      }
    );
    let settings = config.loader_settings();
    assert_eq!(settings.initial_limit, 100);
    assert_eq!(settings.refresh_delay, Duration::ZERO);
    assert!(settings.refresh_on_hit);
  }

  #[test]
  fn test_disabled_cache() {
    let config =
      Config::parse("source:\n  url: https://abc.supabase.co\ncache:\n  enabled: false\n").unwrap();
    assert_eq!(config.store_location().unwrap(), StoreLocation::Disabled);
  }

  #[test]
  fn test_in_memory_cache_path() {
    let config =
      Config::parse("source:\n  url: https://abc.supabase.co\ncache:\n  path: \":memory:\"\n").unwrap();
    assert_eq!(config.store_location().unwrap(), StoreLocation::Memory);
  }

  #[test]
  fn test_rejects_zero_page_size() {
    let err = Config::parse("source:\n  url: https://x\nloader:\n  page_size: 0\n").unwrap_err();
    assert!(err.to_string().contains("page_size"));
  }

  #[test]
  fn test_rejects_missing_source() {
    assert!(Config::parse("cache:\n  enabled: true\n").is_err());
  }

  #[test]
  fn test_explicit_missing_path() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
  }
}
