//! Available commands

use clap::Subcommand;
use std::path::PathBuf;

use crate::statute::DEFAULT_DISPLAY_LIMIT;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Show a statute, loading it through the cache
  #[command(alias = "r")]
  Read {
    /// Statute table name, e.g. "CP - Código Penal"
    collection: String,

    /// Only show articles whose number or text contains this
    #[arg(short, long)]
    search: Option<String>,

    /// Cap on articles shown when not searching
    #[arg(short, long, default_value_t = DEFAULT_DISPLAY_LIMIT)]
    limit: usize,

    /// Print what is available now instead of waiting for the full collection
    #[arg(long)]
    no_wait: bool,
  },

  /// List the articles that have a narration
  #[command(alias = "p")]
  Playlist { collection: String },

  /// Fetch the whole collection now and rewrite its cache entry
  Refresh { collection: String },

  /// Seed the cache from a JSON array of articles
  Import { collection: String, file: PathBuf },

  /// Delete one collection from the cache
  Clear { collection: String },

  /// Show what the cache holds for a collection
  #[command(alias = "s")]
  Status { collection: String },

  /// Delete every cached collection
  Purge,
}

impl Command {
  /// Collection the command works on, if any.
  pub fn collection(&self) -> Option<&str> {
    match self {
      Command::Read { collection, .. }
      | Command::Playlist { collection }
      | Command::Refresh { collection }
      | Command::Import { collection, .. }
      | Command::Clear { collection }
      | Command::Status { collection } => Some(collection),
      Command::Purge => None,
    }
  }
}
