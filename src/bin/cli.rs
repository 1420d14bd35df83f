//! CLI client: store, retrieve and list files

use clap::{Parser, Subcommand};
use minidfs::common::format_bytes;
use minidfs::{Config, DfsClient};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs")]
#[command(about = "minidfs distributed file store CLI")]
#[command(version)]
struct Cli {
    /// Coordinator address (host:port)
    #[arg(long)]
    coordinator: Option<String>,

    /// Config file (defaults to ./minidfs.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a local file
    Put {
        /// Local file to upload
        src: PathBuf,

        /// Name to store it under (defaults to the file's base name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Retrieve a stored file
    Get {
        /// Stored file name
        name: String,

        /// Local destination path
        dest: PathBuf,
    },

    /// List stored files
    Ls,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut client_config = config.client;
    if let Some(coordinator) = cli.coordinator {
        client_config.coordinator_addr = coordinator;
    }
    let client = DfsClient::new(client_config);

    match cli.command {
        Commands::Put { src, name } => {
            let report = client.put_file(&src, name.as_deref()).await?;
            println!(
                "Stored {} ({}) in {} chunks",
                report.name,
                format_bytes(report.size),
                report.chunks.len()
            );
            for chunk in &report.chunks {
                println!("  chunk {}: {} bytes on {}", chunk.index, chunk.size, chunk.node);
            }
        }

        Commands::Get { name, dest } => {
            let report = client.get_file(&name, &dest).await?;
            println!(
                "Retrieved {} ({}) from {} chunks into {}",
                report.name,
                format_bytes(report.size),
                report.chunks,
                report.path.display()
            );
        }

        Commands::Ls => {
            for file in client.list().await? {
                println!("{} {} bytes", file.name, file.size);
            }
        }
    }

    Ok(())
}
