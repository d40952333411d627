//! Logging setup using `tracing` and `tracing-subscriber`.
//!
//! Log lines go to a daily-rolling file under the data directory and,
//! optionally, to stderr. `VADEMECUM_LOG` takes any `EnvFilter` directive
//! and overrides the verbosity flag.

use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV: &str = "VADEMECUM_LOG";
const LOG_FILE_PREFIX: &str = "vademecum.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
  pub level: Level,
  /// Directory for the rolling log file; no file output when `None`
  pub directory: Option<PathBuf>,
  pub stderr: bool,
}

impl LogConfig {
  /// - 0 (no `-v`): info
  /// - 1 (`-v`): debug
  /// - 2+ (`-vv`): trace
  pub fn from_verbosity(verbosity: u8) -> Self {
    let level = match verbosity {
      0 => Level::INFO,
      1 => Level::DEBUG,
      _ => Level::TRACE,
    };
    Self {
      level,
      directory: None,
      stderr: false,
    }
  }

  pub fn with_directory(mut self, directory: Option<PathBuf>) -> Self {
    self.directory = directory;
    self
  }

  pub fn with_stderr(mut self, enable: bool) -> Self {
    self.stderr = enable;
    self
  }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the program.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let (file_layer, guard) = match &config.directory {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_writer(writer).with_ansi(false);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  let stderr_layer = config
    .stderr
    .then(|| fmt::layer().with_writer(io::stderr).with_target(false));

  tracing_subscriber::registry()
    .with(build_env_filter(config.level))
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn build_env_filter(level: Level) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
    // Dependencies stay at warn
    let level = level.as_str().to_lowercase();
    EnvFilter::new(format!("warn,vademecum={level}"))
  })
}
