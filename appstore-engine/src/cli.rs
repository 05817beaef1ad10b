//! Command-line interface of the `appstore-server` binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::archive::admit_existing;
use crate::config::Config;
use crate::introspect::inspect_archive;
use crate::server::run_server;

#[derive(Debug, Parser)]
#[command(name = "appstore-server")]
#[command(about = "App store package lifecycle and federation engine")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file; built-in defaults when absent
    #[arg(long, short, default_value = "appstore.json", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the peer federation surface
    Start {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for package storage
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Validate, extract and introspect a package archive, printing its metadata
    Inspect {
        /// Path to a .csar or .zip package
        archive: PathBuf,
    },
}

impl Cli {
    /// Load the configuration file and apply command-line overrides.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load_or_default(&self.config)
            .with_context(|| format!("Failed to load config from {}", self.config.display()))?;

        if let Commands::Start { host, port, data } = &self.command {
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(data) = data {
                config.storage.data_dir = data.clone();
            }
        }
        config.logging = config.logging.with_env_overrides();
        Ok(config)
    }
}

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Start { .. } => run_server(config).await,
        Commands::Inspect { archive } => inspect(&config, archive).await,
    }
}

async fn inspect(config: &Config, archive: PathBuf) -> Result<()> {
    let file_name = archive
        .file_name()
        .and_then(|name| name.to_str())
        .context("Archive path has no usable file name")?
        .to_string();

    admit_existing(&config.package_profile(), &file_name, &archive)?;

    let scratch = std::env::temp_dir();
    let extraction = config.extraction_limits();
    let limits = config.introspect_limits();
    let info = tokio::task::spawn_blocking(move || {
        inspect_archive(&archive, &scratch, &extraction, &limits)
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
