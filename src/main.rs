//! # Trove CLI (`trove`)
//!
//! ## Usage
//!
//! ```bash
//! trove --config ./config/trove.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trove init` | Create the SQLite database and run schema migrations |
//! | `trove ingest [--mode reset\|complete]` | Classify and index the dataset tree |
//! | `trove search [--image PATH] [--text TEXT]` | Hybrid visual/textual search |
//! | `trove serve` | Start the HTTP search server |
//! | `trove watch` | Re-ingest after changes settle |
//!
//! ## Exit codes
//!
//! `0` success, `1` configuration or dataset-path error, `2` any other
//! fatal error.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use trove::config;
use trove::error::{exit_code, SetupError};
use trove::ingest::{self, IngestMode};
use trove::progress::ProgressMode;
use trove::{logging, migrate, search, server, watch};

/// Trove: local-first multimodal dataset ingestion, classification and
/// hybrid retrieval.
#[derive(Parser)]
#[command(name = "trove", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trove.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file with the `records` and
    /// `folder_contracts` tables. Safe to run repeatedly.
    Init,

    /// Ingest the dataset tree.
    ///
    /// `complete` resumes: sealed archives whose folder signature has not
    /// changed are skipped, as are files whose content is already indexed.
    /// `reset` clears the store first.
    Ingest {
        #[arg(long, value_enum, default_value = "complete")]
        mode: IngestMode,

        /// Progress output on stderr (default: human when stderr is a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Search indexed records with an image, a text, or both.
    Search {
        /// Query image.
        #[arg(long)]
        image: Option<PathBuf>,

        /// Query text.
        #[arg(long)]
        text: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP search server on `[server].bind`.
    Serve,

    /// Watch the dataset and re-ingest after changes settle.
    Watch {
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config).map_err(SetupError::Config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { mode, progress } => {
            ingest::ensure_dataset_root(&cfg)?;
            require_embeddings(&cfg, "ingest")?;
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&cfg, mode, progress).await?;
        }
        Commands::Search {
            image,
            text,
            limit,
            json,
        } => {
            require_embeddings(&cfg, "search")?;
            search::run_search(&cfg, image, text, limit, json).await?;
        }
        Commands::Serve => {
            require_embeddings(&cfg, "serve")?;
            server::run_server(&cfg).await?;
        }
        Commands::Watch { progress } => {
            ingest::ensure_dataset_root(&cfg)?;
            require_embeddings(&cfg, "watch")?;
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            watch::run_watch(&cfg, progress).await?;
        }
    }

    Ok(())
}

fn require_embeddings(cfg: &config::Config, command: &str) -> anyhow::Result<()> {
    if !cfg.embedding.is_enabled() {
        return Err(SetupError::Unsupported(format!(
            "`{}` needs an embedding provider; set [embedding] provider = \"local\"",
            command
        ))
        .into());
    }
    Ok(())
}
