//! # Figure Harness CLI (`fig`)
//!
//! ## Usage
//!
//! ```bash
//! fig --config ./config/fig.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fig init` | Create the SQLite ledger and its tables |
//! | `fig extract` | Extract text and images from every PDF under `input_dir` |
//! | `fig analyze` | Describe every extracted image with the vision model |
//! | `fig retry` | Re-run failed analyses |
//! | `fig index` | Validate descriptions and add them to the vector store |
//! | `fig run` | `extract`, `analyze`, then `index` |
//! | `fig query "<text>"` | Search indexed figures |
//! | `fig get <pdf>` | Show the ledger records of one document |
//! | `fig stats` | Ledger and store counts |
//!
//! Logs go to stderr (`RUST_LOG` or `--verbose`); summaries and query
//! results go to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use figure_harness::ledger::RetryFilter;
use figure_harness::search::QueryOptions;
use figure_harness::{config, get, migrate, pipeline, search, stats};

/// Figure Harness CLI: extract, describe, and index figures from PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/fig.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "fig",
    about = "Figure Harness: extract, describe, and index figures from PDFs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fig.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the ledger schema. Safe to run repeatedly.
    Init,

    /// Extract text and images from PDFs.
    ///
    /// Already-processed paths are skipped. A PDF whose bytes match an
    /// earlier one is recorded as a duplicate and deleted.
    Extract,

    /// Analyze extracted images with the configured vision provider.
    ///
    /// Images with an existing analysis record are not sent again,
    /// whatever that record's outcome; use `retry` for failures.
    Analyze,

    /// Re-run failed analyses, oldest first.
    Retry {
        /// Only records that ended with this HTTP status (e.g. 429).
        /// Without it, every unsuccessful record is selected.
        #[arg(long)]
        status: Option<i64>,

        /// Skip this many matching records.
        #[arg(long, default_value = "0")]
        offset: u32,

        /// Retry at most this many records.
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Validate successful analyses and add them to the vector store.
    Index,

    /// Run extract, analyze, and index in order.
    Run,

    /// Search indexed figures by free text.
    Query {
        /// Search text.
        query: String,

        /// Maximum number of results (default: `retrieval.final_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print hits as JSON.
        #[arg(long)]
        json: bool,

        /// Keep the base64 image payload in the output.
        #[arg(long)]
        with_images: bool,
    },

    /// Show everything recorded for one PDF (path or file stem).
    Get { pdf: String },

    /// Show ledger and store statistics.
    Stats,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Ledger initialized successfully.");
        }
        Commands::Extract => {
            pipeline::run_extract(&cfg).await?;
        }
        Commands::Analyze => {
            pipeline::run_analyze(&cfg).await?;
        }
        Commands::Retry {
            status,
            offset,
            limit,
        } => {
            let filter = match status {
                Some(code) => RetryFilter::status(code),
                None => RetryFilter::unsuccessful(),
            }
            .window(offset, limit);
            pipeline::run_retry(&cfg, &filter).await?;
        }
        Commands::Index => {
            pipeline::run_index(&cfg).await?;
        }
        Commands::Run => {
            pipeline::run_all(&cfg).await?;
        }
        Commands::Query {
            query,
            limit,
            json,
            with_images,
        } => {
            let options = QueryOptions {
                limit,
                json,
                with_images,
            };
            search::run_query(&cfg, &query, &options).await?;
        }
        Commands::Get { pdf } => {
            get::run_get(&cfg, &pdf).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
