//! # Reel Relay CLI (`relay`)
//!
//! ## Usage
//!
//! ```bash
//! relay --config ./config/relay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `relay init` | Create the SQLite database and run schema migrations |
//! | `relay run` | Run the schedule loop (`--once` for a single iteration) |
//! | `relay history` | List recent history rows |
//! | `relay stats` | Summarize history by status and source |
//! | `relay plan` | Print the transform plan and transcoder command |
//! | `relay check` | Report transcoder, source, target, and resource status |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use reel_relay::models::RecordStatus;
use reel_relay::{config, logging, migrate, runner, sources, stats, transform};

/// Reel Relay: an unattended short-video republishing pipeline.
#[derive(Parser)]
#[command(
    name = "relay",
    about = "Reel Relay: pick, re-encode, and republish short videos on a schedule",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relay.toml")]
    config: PathBuf,

    /// Debug-level logging for this crate (ignored when RUST_LOG is set).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run the pipeline.
    ///
    /// Loops with a jittered delay when `schedule.loop_enabled` is true,
    /// otherwise runs one iteration. Ctrl-C stops at the next checkpoint.
    Run {
        /// Run exactly one iteration regardless of config.
        #[arg(long)]
        once: bool,
    },

    /// List recent history rows, newest first.
    History {
        /// Maximum number of rows to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Only show rows with this status (`success` or `error`).
        #[arg(long, value_parser = parse_status)]
        status: Option<RecordStatus>,
    },

    /// Summarize history.
    Stats,

    /// Print the transform plan and the transcoder command it produces.
    Plan {
        /// Input file to show in the command line.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output file to show in the command line.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Check the transcoder, sources, target, and resource gauges.
    Check,
}

fn parse_status(s: &str) -> Result<RecordStatus, String> {
    RecordStatus::parse(s).ok_or_else(|| format!("unknown status '{}': use success or error", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            for dir in [
                &cfg.paths.download_dir,
                &cfg.paths.output_dir,
                &cfg.paths.data_dir,
            ] {
                std::fs::create_dir_all(dir)?;
            }
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run { once } => {
            runner::run_relay(&cli.config, cfg, once).await?;
        }
        Commands::History { limit, status } => {
            stats::run_history(&cfg, limit, status).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Plan { input, output } => {
            transform::run_plan(&cfg, input.as_deref(), output.as_deref());
        }
        Commands::Check => {
            sources::run_check(&cfg).await?;
        }
    }

    Ok(())
}
