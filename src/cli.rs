//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drive a job-based download API from the command line.
///
/// Every call goes through the resilient client: status reads are cached,
/// failing endpoints are circuit-broken, and requests are pooled and retried.
#[derive(Parser, Debug)]
#[command(name = "jobdl")]
#[command(author, version, about)]
pub struct Args {
    /// Base URL of the job API (overrides the config file)
    #[arg(long, env = "JOBDL_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Bearer token for the job API
    #[arg(long, env = "JOBDL_API_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Maximum concurrent requests (1-100, overrides the config file)
    #[arg(short = 'c', long, global = true, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub max_connections: Option<u8>,

    /// Retry attempts for transient failures (0-10, overrides the config file)
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub retry_attempts: Option<u8>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Job operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a download job and print it
    Create(JobArgs),

    /// Print a job's current status
    Status {
        /// Job id
        job_id: String,
    },

    /// Cancel a job and print the updated record
    Cancel {
        /// Job id
        job_id: String,
    },

    /// Wait until a job finishes and print the final record
    Wait {
        /// Job id
        job_id: String,

        /// Give up after this many seconds (overrides the config file)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout_secs: Option<u64>,
    },

    /// Download a job's result to a file
    Fetch {
        /// Job id
        job_id: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Create a job, wait for it, and download its result
    Run {
        #[command(flatten)]
        job: JobArgs,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Give up waiting after this many seconds (overrides the config file)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout_secs: Option<u64>,
    },

    /// Print the effective configuration and empty client stats as JSON
    Stats,
}

/// What to download.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct JobArgs {
    /// Account the download runs under
    #[arg(long)]
    pub account: String,

    /// Target to download
    #[arg(long)]
    pub target: String,

    /// Server-side save location
    #[arg(long = "save-to")]
    pub save_to: Option<String>,
}
