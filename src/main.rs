mod app;
mod cache;
mod commands;
mod config;
mod error;
mod logging;
mod query;
mod source;
mod statute;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vademecum")]
#[command(about = "Local-first reader for Brazilian statutes")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/vademecum/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// More log detail (-v debug, -vv trace); VADEMECUM_LOG overrides
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Also write log lines to stderr
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Keep the guard alive so buffered log lines are flushed on exit
  let log_config = logging::LogConfig::from_verbosity(args.verbose)
    .with_directory(config::Config::data_dir().ok().map(|dir| dir.join("logs")))
    .with_stderr(args.log_stderr);
  let _guard = logging::init(&log_config)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Initialize and run the app
  let app = app::App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}
