//! dropzone - watch a folder and load XML entries into a database

use anyhow::Result;
use clap::Parser;
use cli_lib::{logging, Config, Monitor};
use std::path::PathBuf;
use tracing::error;

/// Dropzone - load XML entries dropped into a folder into a database table
#[derive(Parser)]
#[command(name = "dropzone")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let _guard = logging::init(config.logging.directory())?;

    if cli.check {
        println!("Configuration OK: {}", cli.config.display());
        return Ok(());
    }

    let monitor = Monitor::start(&config)?;
    monitor
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
            }
        })
        .await;
    monitor.shutdown();

    Ok(())
}
