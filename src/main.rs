mod app;
mod event;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use refetch::config::Config;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "refetch")]
#[command(about = "Recover a cached query from a payload the view cannot render")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/refetch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Replay the scenario without a terminal UI, printing each frame
  #[arg(long)]
  headless: bool,

  /// Retries before headless mode gives up
  #[arg(long, default_value_t = 3)]
  max_retries: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Stdout belongs to the UI, so logs go to a file
  let _guard = init_logging(&config)?;

  // Initialize and run the app
  let mut app = app::App::new(&config)?;
  if args.headless {
    app.run_headless(args.max_retries).await?;
  } else {
    app.run().await?;
  }

  Ok(())
}

fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
  let Some(dir) = config.log_directory() else {
    return Ok(None);
  };

  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&dir, "refetch.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    EnvFilter::try_from_env("REFETCH_LOG").unwrap_or_else(|_| EnvFilter::new(&config.log.filter));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}
