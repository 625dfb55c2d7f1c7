use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use torrent_shuttle::{CliArgs, Config};

#[derive(Parser)]
#[command(name = "torrent-shuttle")]
#[command(about = "A tiered-storage manager daemon for qBittorrent")]
struct Cli {
    #[arg(short, long, help = "Path to the configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Run in dry-run mode (no file operations, no client mutations)")]
    dry_run: bool,

    #[arg(short, long, help = "Increase verbosity")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load_with_cli(&CliArgs {
        config_file: cli.config.clone(),
        dry_run: cli.dry_run,
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        config
            .logging
            .level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Err(e) = config.validate() {
        tracing::error!("configuration invalid: {e}");
        std::process::exit(1);
    }

    torrent_shuttle::run(config).await
}
