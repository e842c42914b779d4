//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pq - run a batch of jobs with bounded concurrency
#[derive(Parser)]
#[command(
    name = "pq",
    about = "Run a batch of jobs with bounded concurrency",
    version,
    after_help = "Set RUST_LOG or --log-level to control log output (written to stderr)"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Maximum number of jobs running at once
    #[arg(short = 'j', long, global = true)]
    pub concurrency: Option<usize>,

    /// Keep successful results in the final report
    #[arg(long, global = true)]
    pub save_results: bool,

    /// Keep admitting jobs after a failure
    #[arg(short, long, global = true)]
    pub keep_going: bool,

    /// Directory to write a JSONL event log into
    #[arg(long, global = true, value_name = "DIR")]
    pub events: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run jobs that each sleep and then log a line
    Sleep {
        /// Number of jobs to submit
        #[arg(short = 'n', long, default_value = "10")]
        jobs: usize,

        /// How long each job sleeps
        #[arg(short, long, default_value = "1000")]
        sleep_ms: u64,

        /// Make every K-th job fail
        #[arg(short, long, value_name = "K")]
        fail_every: Option<usize>,

        /// Per-job timeout (defaults to the config value)
        #[arg(short, long)]
        timeout_secs: Option<u64>,
    },

    /// Copy every regular file of a directory, one job per file
    Copy {
        /// Source directory
        #[arg(value_name = "SRC_DIR")]
        src: PathBuf,

        /// Destination directory (created if missing)
        #[arg(value_name = "DST_DIR")]
        dst: PathBuf,
    },
}
