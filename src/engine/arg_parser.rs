use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Incremental, restartable export of repository objects to a directory tree.
#[derive(Clone, Parser)]
#[command(name = "docexport")]
#[command(about = "Export repository objects to a local tree with a CSV manifest; reruns pick up only what changed.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Build the queue from the catalog and export every READY item.
    Export(ExportArgs),
    /// Print queue item counts per status.
    Status(StoreArgs),
    /// Clear an output lock left behind by a crashed run on this host.
    Unlock(StoreArgs),
}

/// Flags left unset fall back to `.docexport.toml`, then to built-in defaults.
#[derive(Clone, Args)]
pub struct ExportArgs {
    /// JSON catalog describing the repository objects.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Queue store file. Default: `docexport.db` in the working directory.
    #[arg(long, short)]
    pub database: Option<PathBuf>,

    /// Output directory root.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Write a CSV manifest of exported files here.
    #[arg(long, short)]
    pub manifest: Option<PathBuf>,

    /// Write INFO/WARN/ERROR lines here instead of stderr.
    #[arg(long, short)]
    pub warnings: Option<PathBuf>,

    /// Candidate filter, e.g. `folder=/Finance and format=pdf`.
    #[arg(long, short)]
    pub query: Option<String>,

    /// Extra manifest columns. Can specify multiple: -a title owner
    #[arg(long, short = 'a', num_args = 1..)]
    pub attributes: Vec<String>,

    /// Number of workers.
    #[arg(long, short, value_parser = clap::value_parser!(usize))]
    pub threads: Option<usize>,

    /// Clear the queue store before enumerating (forces a full export).
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub reset: Option<bool>,

    /// Output lock attempts before an item fails.
    #[arg(long)]
    pub lock_attempts: Option<u32>,

    /// Delay between output lock attempts, in milliseconds.
    #[arg(long)]
    pub lock_delay_ms: Option<u64>,

    /// Re-arm IN_PROGRESS items older than this many seconds at startup. 0 disables.
    #[arg(long)]
    pub stale_after_secs: Option<u64>,

    /// Seconds in-flight items get to finish at shutdown before being cancelled.
    #[arg(long)]
    pub grace_secs: Option<u64>,

    /// Verbose output and a progress bar.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    /// Config file. Default: `.docexport.toml` in the working directory, if present.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Args)]
pub struct StoreArgs {
    /// Queue store file. Default: from the config file, else `docexport.db`.
    #[arg(long, short)]
    pub database: Option<PathBuf>,

    /// Config file. Default: `.docexport.toml` in the working directory, if present.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    #[arg(long, short = 'v')]
    pub verbose: bool,
}
