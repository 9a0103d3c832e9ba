// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::pipelines::Pipeline;
use crate::types::RetryPolicy;

/// Command-line arguments for `ngsflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ngsflow",
    version,
    about = "Build and run genomics sample pipelines as a resource-aware job DAG.",
    long_about = None
)]
pub struct CliArgs {
    /// Samples file (one `[section]` per library).
    #[arg(short = 's', long, value_name = "PATH")]
    pub samples: PathBuf,

    /// Runtime configuration (TOML).
    ///
    /// Default: `ngsflow.toml` in the current working directory, if present.
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Pipeline to run.
    #[arg(short = 'p', long, value_enum)]
    pub pipeline: Pipeline,

    /// Directory for output files. Default: current directory.
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Maximum number of concurrently running jobs.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Attempts per job before it is marked failed (1 = no retries).
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// How retry attempts are counted.
    #[arg(long, value_enum)]
    pub retry_policy: Option<RetryPolicy>,

    /// Core budget shared by all running jobs.
    #[arg(long, value_name = "N")]
    pub cores: Option<u32>,

    /// Memory budget shared by all running jobs (e.g. `64G`).
    #[arg(long, value_name = "SIZE")]
    pub memory: Option<String>,

    /// Checkpoint file. Default: `.ngsflow/checkpoint.json` in the workdir.
    #[arg(long, value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,

    /// Ignore and clear the checkpoint; run every job.
    #[arg(long)]
    pub fresh: bool,

    /// Build and validate the job graph, print it, but run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `NGSFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
