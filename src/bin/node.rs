//! Data node binary

use clap::{Parser, Subcommand};
use minidfs::{Config, DataNode};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-node")]
#[command(about = "minidfs data node")]
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
    /// Register with the coordinator and serve chunks
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Address announced to the coordinator (defaults to the bound IP)
        #[arg(long)]
        advertise: Option<String>,

        /// Data directory for blocks
        #[arg(long)]
        data: Option<PathBuf>,

        /// Coordinator address (host:port)
        #[arg(long)]
        coordinator: Option<String>,
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
        Commands::Serve {
            bind,
            advertise,
            data,
            coordinator,
        } => {
            let mut node_config = config.data_node;
            if let Some(bind) = bind {
                node_config.bind_addr = bind;
            }
            if advertise.is_some() {
                node_config.advertise_addr = advertise;
            }
            if let Some(data) = data {
                node_config.data_path = data;
            }
            if let Some(coordinator) = coordinator {
                node_config.coordinator_addr = coordinator;
            }

            let node = DataNode::bind(node_config).await?;

            tokio::select! {
                result = node.run() => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down data node");
                }
            }
        }
    }

    Ok(())
}
