//! # Forage CLI (`forage`)
//!
//! The `forage` binary drives the harvesting scheduler. It is designed to be
//! invoked once per day (cron or manually); the checkpoint's re-entrancy
//! guard makes extra invocations on the same day a no-op.
//!
//! ## Usage
//!
//! ```bash
//! forage --config ./config/forage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `forage run` | Walk all sources, enrich new posts, append to the store |
//! | `forage run --dry-run` | Walk only; no enrichment, persistence, or checkpoint save |
//! | `forage run --force` | Ignore the once-per-day guard |
//! | `forage status` | Show per-source backfill progress |
//! | `forage reset` | Delete the checkpoint so the next run restarts the backfill |

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use forage::checkpoint::CheckpointFile;
use forage::config::{self, Config};
use forage::enrich::Enricher;
use forage::origin;
use forage::scheduler::{RunOptions, Scheduler};
use forage::store::TableStore;

/// Forage — an incremental, checkpointed forum harvesting pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/forage.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "forage",
    about = "Forage — an incremental, checkpointed forum harvesting and enrichment pipeline",
    version,
    long_about = "Forage walks a fixed set of discussion forums over a schedule of time windows, \
    enriches new posts with AI-derived metadata plus deterministic financial-fact extraction, \
    and appends them to a remote table store, resuming multi-day backfills via a durable checkpoint."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/forage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one harvest invocation.
    ///
    /// Walks each source's current window under the daily budget, enriches
    /// new posts, appends them to the store, and saves the checkpoint.
    /// Safe to invoke more than once per day: repeat invocations no-op.
    Run {
        /// Walk sources only — no enrichment, no persistence, no checkpoint save.
        #[arg(long)]
        dry_run: bool,

        /// Ignore the once-per-day re-entrancy guard.
        #[arg(long)]
        force: bool,
    },

    /// Show per-source backfill progress from the checkpoint.
    Status,

    /// Delete the checkpoint so the next run restarts the backfill.
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run { dry_run, force } => {
            let origin = origin::from_config(&cfg.origin)?;
            let store = Box::new(TableStore::from_config(&cfg.store)?);
            let enricher = Enricher::from_config(&cfg.ai)?;
            let checkpoint_file = CheckpointFile::new(&cfg.harvest.checkpoint_path);

            let mut scheduler = Scheduler::new(cfg, origin, store, enricher, checkpoint_file);
            let summary = scheduler
                .run(Local::now().date_naive(), RunOptions { dry_run, force })
                .await?;

            if summary.already_ran {
                println!("already ran today; nothing to do (use --force to override)");
                return Ok(());
            }
            println!("run{}", if dry_run { " (dry-run)" } else { "" });
            println!("  fetched: {} posts", summary.fetched);
            println!("  skipped duplicates: {}", summary.skipped_duplicates);
            if !dry_run {
                println!("  pushed: {}", summary.pushed);
                println!("  errors: {}", summary.errors);
            }
            println!("ok");
        }
        Commands::Status => {
            print_status(&cfg)?;
        }
        Commands::Reset => {
            let checkpoint_file = CheckpointFile::new(&cfg.harvest.checkpoint_path);
            if checkpoint_file.reset()? {
                println!("Checkpoint reset. Next run will start fresh.");
            } else {
                println!("No checkpoint found.");
            }
        }
    }

    Ok(())
}

/// Print the checkpoint as a per-source progress table.
fn print_status(cfg: &Config) -> Result<()> {
    let checkpoint = CheckpointFile::new(&cfg.harvest.checkpoint_path).load()?;
    let schedule = cfg.harvest.schedule();

    println!("Forage — Harvest Progress");
    println!("=========================");
    println!();
    println!(
        "  Last run:      {}",
        checkpoint.last_run_date.as_deref().unwrap_or("never")
    );
    println!("  Total fetched: {}", checkpoint.total_fetched);
    println!();

    for source in &cfg.harvest.sources {
        let progress = checkpoint.sources.get(source).copied().unwrap_or_default();
        let window = match schedule.get(progress.window_index) {
            Some(window) => window.key.label(),
            None => "backfilled (daily mode)",
        };
        println!("  {:<22} {:>8} fetched   {}", source, progress.fetched, window);
    }

    Ok(())
}
