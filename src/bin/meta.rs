//! Coordinator binary

use clap::{Parser, Subcommand};
use minidfs::{Config, Coordinator};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-meta")]
#[command(about = "minidfs coordinator (metadata service)")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Database directory
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { bind, db } => {
            // CLI arguments take priority over the config file
            let mut coord_config = config.coordinator;
            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if let Some(db) = db {
                coord_config.db_path = db;
            }

            let coord = Coordinator::bind(coord_config).await?;
            let state = coord.state();

            tokio::select! {
                result = coord.serve() => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down coordinator");
                    state.directory().flush()?;
                }
            }
        }
    }

    Ok(())
}
