//! Quiver-DB CLI
//!
//! An in-process IVF vector search engine served over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # Start the server with a durable WAL
//! quiver-db serve --dim 128 --wal data/quiver.wal --port 8080
//!
//! # Ephemeral engine (no durability)
//! quiver-db serve --dim 128
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quiver_db::engine::{Engine, EngineConfig};
use quiver_db::server::serve;

#[derive(Parser)]
#[command(name = "quiver-db")]
#[command(about = "An in-process IVF vector search engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Vector dimension
        #[arg(short, long)]
        dim: usize,

        /// Path of the write-ahead log (omit for no durability)
        #[arg(short, long)]
        wal: Option<PathBuf>,

        /// Server port
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Worker pool size (0 = hardware parallelism)
        #[arg(long, default_value = "0")]
        threads: usize,

        /// Cap on k-means iterations during index builds
        #[arg(long, default_value = "20")]
        kmeans_max_iter: usize,

        /// PRNG seed for k-means centroid initialization
        #[arg(long, default_value = "42")]
        kmeans_seed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            dim,
            wal,
            port,
            host,
            threads,
            kmeans_max_iter,
            kmeans_seed,
        } => {
            let config = EngineConfig {
                dim,
                wal_path: wal,
                worker_threads: threads,
                kmeans_max_iter,
                kmeans_seed,
            };

            let engine = Arc::new(Engine::open(config)?);
            tracing::info!(
                "engine opened: dim={}, {} vectors recovered",
                engine.dim(),
                engine.count()
            );

            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            serve(engine, addr).await?;
        }
    }

    Ok(())
}
