//! # Incident Harness CLI (`ihx`)
//!
//! ## Usage
//!
//! ```bash
//! ihx --config ./config/ihx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ihx init` | Create the SQLite database and run schema migrations |
//! | `ihx serve` | Start the HTTP API |
//! | `ihx search "<query>"` | Hybrid search over the runbook corpus |
//! | `ihx run "<incident>"` | Plan, route and record an incident |
//! | `ihx ocr <image>` | OCR an image, then run it as an incident |
//! | `ihx runs list` | List recorded runs, most recent first |
//! | `ihx runs get <id>` | Show one run |
//! | `ihx runs replay <id>` | Re-plan a run's incident as a new run |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use incident_harness::pipeline::RunOptions;
use incident_harness::{config, logging, migrate, runs, search, server};
use incident_harness_core::models::RunQuery;
use incident_harness_core::search::SearchFilters;

/// Incident Harness CLI: hybrid search, plan generation and confidence
/// routing for operational incidents.
#[derive(Parser)]
#[command(
    name = "ihx",
    about = "Incident Harness: retrieve runbook context, plan a fix, route by confidence",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ihx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Metadata filters shared by `search`, `run` and `ocr`.
#[derive(clap::Args, Debug, Default)]
struct FilterArgs {
    /// Only match chunks whose `service` equals this value.
    #[arg(long)]
    service: Option<String>,

    /// Only match chunks whose `error_code` equals this value.
    #[arg(long)]
    error_code: Option<String>,

    /// Only match chunks whose `env` equals this value.
    #[arg(long)]
    env: Option<String>,

    /// Only match chunks whose text contains this keyword.
    #[arg(long)]
    keyword: Option<String>,
}

impl FilterArgs {
    fn filters(&self) -> SearchFilters {
        SearchFilters::new(
            self.service.as_deref(),
            self.error_code.as_deref(),
            self.env.as_deref(),
            self.keyword.as_deref(),
        )
    }
}

/// Routing switches shared by `run` and `ocr`.
#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Number of hits to retrieve (defaults to `[retrieval].top_k`).
    #[arg(long)]
    top_k: Option<usize>,

    /// Do not post a notification even when confidence allows it.
    #[arg(long)]
    no_notify: bool,

    /// Open a ticket when the run routes to auto_fix.
    #[arg(long)]
    create_ticket: bool,

    #[command(flatten)]
    filters: FilterArgs,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            top_k: self.top_k,
            filters: self.filters.filters(),
            notify: !self.no_notify,
            create_ticket: self.create_ticket,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Hybrid search: vector KNN plus metadata and keyword filters.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        top_k: Option<usize>,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Run an incident through search, planning and routing.
    Run {
        /// Incident text.
        text: String,

        #[command(flatten)]
        args: RunArgs,
    },

    /// Extract text from an image and run it as an incident.
    Ocr {
        /// Path to the image file.
        path: PathBuf,

        #[command(flatten)]
        args: RunArgs,
    },

    /// Inspect and replay recorded runs.
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List runs, most recent first.
    List {
        /// Page size (1..=200).
        #[arg(long)]
        limit: Option<i64>,

        /// Number of runs to skip.
        #[arg(long)]
        offset: Option<i64>,

        /// Only runs for this incident.
        #[arg(long)]
        incident_id: Option<i64>,
    },
    /// Show one run.
    Get {
        /// Run id.
        id: i64,
    },
    /// Re-plan the run's incident as a new run. Never opens tickets.
    Replay {
        /// Run id.
        id: i64,

        /// Do not post a notification for the new run.
        #[arg(long)]
        no_notify: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Search {
            query,
            top_k,
            filters,
        } => {
            search::run_search(&cfg, &query, top_k, filters.filters()).await?;
        }
        Commands::Run { text, args } => {
            runs::run_incident(&cfg, &text, &args.options()).await?;
        }
        Commands::Ocr { path, args } => {
            runs::run_ocr(&cfg, &path, &args.options()).await?;
        }
        Commands::Runs { action } => match action {
            RunsAction::List {
                limit,
                offset,
                incident_id,
            } => {
                let query = RunQuery::new(limit, offset, incident_id)?;
                runs::list_runs(&cfg, &query).await?;
            }
            RunsAction::Get { id } => {
                runs::get_run(&cfg, id).await?;
            }
            RunsAction::Replay { id, no_notify } => {
                runs::replay_run(&cfg, id, !no_notify).await?;
            }
        },
    }

    Ok(())
}
