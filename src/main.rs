//! # infradoc CLI
//!
//! Turns per-system infrastructure snapshots into a merged document store
//! of entities and relationships.
//!
//! ## Usage
//!
//! ```bash
//! infradoc --config ./config/infradoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `infradoc process` | Build, cluster, and merge all discovered snapshots |
//! | `infradoc stats` | Summarise the store |
//! | `infradoc get <id>` | Show one document and its relationships |
//! | `infradoc validate` | Check relationship integrity of the store |
//! | `infradoc sources` | List snapshot files and registered builders |
//!
//! ## Examples
//!
//! ```bash
//! # Reprocess one system, leaving the others as they are
//! infradoc process --system pve1
//!
//! # See what a run would produce without writing anything
//! infradoc process --dry-run --progress human
//!
//! # Inspect a container
//! infradoc get container_pve1_nextcloud-app --json
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use infradoc::config;
use infradoc::pipeline::{self, ProcessOptions};
use infradoc::progress::ProgressMode;
use infradoc::{get, sources, stats, validate};

/// infradoc: infrastructure snapshots in, documented entity graph out.
#[derive(Parser)]
#[command(name = "infradoc", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/infradoc.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Progress reporting on stderr. Defaults to human on a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Process snapshots and merge the results into the store.
    ///
    /// Systems whose snapshot is processed have their documents replaced;
    /// every other system's documents are preserved.
    Process {
        /// Only process this system. Repeatable.
        #[arg(long = "system")]
        systems: Vec<String>,

        /// Build and cluster, but do not write the store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show store statistics.
    Stats,

    /// Retrieve a document by id.
    Get {
        id: String,

        /// Print the document and its relationships as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Validate relationships in the store. Exits non-zero on errors.
    Validate {
        #[arg(long)]
        json: bool,
    },

    /// List snapshot files and section builders.
    Sources,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "infradoc=info,infradoc_core=info",
        1 => "infradoc=debug,infradoc_core=debug",
        _ => "infradoc=trace,infradoc_core=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let cfg = config::load_config_or_minimal(&cli.config)?;

    match cli.command {
        Commands::Process { systems, dry_run } => {
            let progress = cli
                .progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let options = ProcessOptions { systems, dry_run };
            pipeline::run_process(&cfg, &options, progress.as_ref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json)?;
        }
        Commands::Validate { json } => {
            validate::run_validate(&cfg, json)?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
    }

    Ok(())
}
