use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Build presentation documents for works held in the content repository.
#[derive(Clone, Parser)]
#[command(name = "work-presentation")]
#[command(about = "Build and inspect work presentation documents.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// SQLite database holding the cache and the documents. Default: `work-presentation.db`.
    #[arg(long, short, global = true)]
    pub db: Option<PathBuf>,

    /// Config file. Default: `work-presentation.toml` in the current directory, if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output.
    #[arg(long, short = 'v', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Queue the given work ids and run the worker until they are all done.
    Process(ProcessArgs),
    /// Print the modification time of a stored document or cache entry.
    Timestamp {
        /// Persistent work id or manifestation id.
        id: String,
    },
    /// Print a stored work document as JSON.
    Show {
        /// Persistent work id, e.g. `work-of-870970-basis:12345678`.
        persistent_work_id: String,
    },
}

#[derive(Clone, Args)]
pub struct ProcessArgs {
    /// Work ids, e.g. `work:1`.
    #[arg(value_name = "WORK_ID", required = true)]
    pub work_ids: Vec<String>,

    /// Base URL of the repository's content service.
    #[arg(long, short = 'u')]
    pub repository_url: Option<String>,

    /// Queue worker threads.
    #[arg(long, short = 't')]
    pub threads: Option<usize>,

    /// Content generators kept alive.
    #[arg(long, short = 'p')]
    pub pool_size: Option<usize>,

    /// Threads regenerating cache entries within one job.
    #[arg(long)]
    pub executor_threads: Option<usize>,

    /// Collapse pending jobs for the same work into one run.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub deduplicate: Option<bool>,

    /// Show a progress bar.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub progress: Option<bool>,
}
