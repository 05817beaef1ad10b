//! `appstore-server` binary: serves the federation surface or inspects a
//! package archive from the command line.

use anyhow::Result;
use appstore_engine::cli::{self, Cli};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // Dropping the guard flushes buffered file output.
    let _guard = appstore_logging::init_subscriber(&config.logging);
    info!(config = %cli.config.display(), "Configuration loaded");

    cli::run(cli, config).await
}
