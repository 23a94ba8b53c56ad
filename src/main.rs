mod commands;
mod logging;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use mangashelf::api::MangaClient;
use mangashelf::config::Config;

#[derive(Parser, Debug)]
#[command(name = "mangashelf")]
#[command(about = "Browse a manga catalog and manage your collection")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mangashelf/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API root to use instead of the configured one
  #[arg(long)]
  api_url: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(url) = args.api_url {
    config.api.base_url = url;
  }

  let _log_guard = logging::init(&config)?;

  let client = MangaClient::from_config(&config)?;
  commands::run(args.command, &client).await?;

  Ok(())
}
