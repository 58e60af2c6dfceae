//! # Ticker Mirror CLI (`tmx`)
//!
//! ## Usage
//!
//! ```bash
//! tmx --config ./config/mirror.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tmx init` | Create both SQLite databases and run migrations |
//! | `tmx entities` | List the entity registry |
//! | `tmx status <ticker>` | Freshness of every component, read-only |
//! | `tmx ensure <ticker>` | Bring components up to policy and mirror them |
//! | `tmx retrieve <ticker> "<query>"` | Read-only search within a ticker |
//! | `tmx ask <ticker> "<query>"` | `ensure` then `retrieve` |
//! | `tmx stats` | Store and index overview |
//! | `tmx serve` | Start the HTTP server |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to adjust.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ticker_mirror::app::App;
use ticker_mirror::commands::{self, EnsureArgs};
use ticker_mirror::{config, migrate, server, stats};

/// Ticker Mirror: keeps a vector index in sync with local per-company
/// financial data.
#[derive(Parser)]
#[command(
    name = "tmx",
    about = "Ticker Mirror: a control plane that mirrors local financial data into a vector index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mirror.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize both database schemas. Safe to run repeatedly.
    Init,

    /// List registered entities.
    Entities,

    /// Show per-component freshness for one entity without refreshing.
    Status {
        ticker: String,
        #[arg(long)]
        cik: Option<String>,
        #[arg(long)]
        scrip_code: Option<String>,
    },

    /// Fetch and reindex whatever is missing or stale.
    Ensure {
        ticker: String,
        #[command(flatten)]
        checklist: ChecklistArgs,
    },

    /// Search the index for one ticker. Never writes.
    Retrieve {
        ticker: String,
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// `narrative` or `narrated_numeric`.
        #[arg(long)]
        category: Option<String>,
    },

    /// Ensure, then retrieve.
    Ask {
        ticker: String,
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[command(flatten)]
        checklist: ChecklistArgs,
    },

    /// Print store and index statistics.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Args)]
struct ChecklistArgs {
    /// Structured component to ensure (repeatable). Default: all.
    #[arg(long = "component", short = 'c')]
    components: Vec<String>,

    /// Include filing text.
    #[arg(long, conflicts_with = "no_unstructured")]
    unstructured: bool,

    /// Exclude filing text.
    #[arg(long)]
    no_unstructured: bool,

    /// Refetch regardless of freshness.
    #[arg(long)]
    force: bool,

    /// SEC CIK, for US entities not in the registry.
    #[arg(long)]
    cik: Option<String>,

    /// BSE scrip code, for Indian entities not in the registry.
    #[arg(long)]
    scrip_code: Option<String>,

    /// Overall deadline in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl ChecklistArgs {
    fn into_ensure_args(self) -> EnsureArgs {
        let unstructured = match (self.unstructured, self.no_unstructured) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        EnsureArgs {
            components: self.components,
            unstructured,
            force_refresh: self.force,
            cik: self.cik,
            scrip_code: self.scrip_code,
            timeout_secs: self.timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Databases initialized successfully.");
        return Ok(());
    }

    let app = App::open(&cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Entities => {
            commands::run_entities(&app)?;
        }
        Commands::Status {
            ticker,
            cik,
            scrip_code,
        } => {
            commands::run_status(&app, &ticker, cik, scrip_code).await?;
        }
        Commands::Ensure { ticker, checklist } => {
            commands::run_ensure(&app, &ticker, &checklist.into_ensure_args()).await?;
        }
        Commands::Retrieve {
            ticker,
            query,
            top_k,
            category,
        } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            commands::run_retrieve(&app, &ticker, &query, top_k, category).await?;
        }
        Commands::Ask {
            ticker,
            query,
            top_k,
            checklist,
        } => {
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            commands::run_ask(&app, &ticker, &query, top_k, &checklist.into_ensure_args()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg, &app).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg, app.orchestrator.clone()).await?;
        }
    }

    Ok(())
}
