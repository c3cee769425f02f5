//! # ara-index CLI
//!
//! Builds and serves the retrieval index for the analysis backend.
//!
//! ## Usage
//!
//! ```bash
//! ara-index --config ./config/ara-index.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ara-index serve` | Start the HTTP gateway |
//! | `ara-index seed` | Rebuild the index from the seed area |
//! | `ara-index upload <FILES>...` | Rebuild the index from local files |
//! | `ara-index show [--summary]` | Print the stored index |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `ara_index=info,tower_http=info`). Reports go to stdout as JSON.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ara_index::config::{self, Config};
use ara_index::indexer::{summarize, Indexer};
use ara_index::models::{IndexPayload, SourceDocument};
use ara_index::server;
use ara_index::store::open_backend;

#[derive(Parser)]
#[command(
    name = "ara-index",
    about = "Document chunking and retrieval-index persistence",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, defaults with an in-memory store are
    /// used.
    #[arg(long, global = true, default_value = "./config/ara-index.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway on `[server].bind`.
    Serve,

    /// Rebuild the index from every supported document in the seed area.
    ///
    /// The sharded backend has no seed area and always writes an empty index.
    Seed,

    /// Rebuild the index from local files, replacing its previous content.
    Upload {
        /// Files to index. The file name becomes the chunk source.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the stored index payload.
    Show {
        /// Print chunk count and sources instead of the full payload.
        #[arg(long)]
        summary: bool,
    },
}

#[derive(Serialize)]
struct IndexSummary {
    chunks: usize,
    sources: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ara_index=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Seed => {
            let report = open_indexer(&cfg).await?.seed().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Upload { files } => {
            let mut documents = Vec::with_capacity(files.len());
            for path in &files {
                documents.push(read_document(path)?);
            }
            let report = open_indexer(&cfg).await?.upload(documents).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Show { summary } => {
            let raw = open_indexer(&cfg)
                .await?
                .read_index()
                .await?
                .context("index not found")?;
            if summary {
                let payload: IndexPayload =
                    serde_json::from_str(&raw).context("Stored index is not valid JSON")?;
                let summary = IndexSummary {
                    chunks: payload.chunks.len(),
                    sources: summarize(&payload.chunks),
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", raw);
            }
        }
    }

    Ok(())
}

async fn open_indexer(cfg: &Config) -> Result<Indexer> {
    let backend = open_backend(cfg).await?;
    Ok(Indexer::new(cfg, backend))
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    tracing::warn!(
        path = %path.display(),
        "config file not found, using defaults with an in-memory store"
    );
    let mut cfg = Config::minimal();
    config::apply_env_overrides(&mut cfg);
    Ok(cfg)
}

fn read_document(path: &Path) -> Result<SourceDocument> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    Ok(SourceDocument::new(name, bytes))
}
