//! CLI entry point for jobdl.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use jobdl_core::{
    ClientConfig, CreateJobRequest, Job, JobStatus, OptimizedClient, load_config,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

mod cli;

use cli::{Args, Command, JobArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries JSON output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(command = ?args.command, "CLI arguments parsed");

    let config = build_config(&args)?;
    let client = OptimizedClient::from_config(&config).context("failed to create job client")?;

    let outcome = run_command(&client, &config, &args).await;
    client.shutdown().await;
    outcome
}

/// Loads the config file (if any) and applies command-line overrides.
fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(base_url) = &args.base_url {
        config.base_url.clone_from(base_url);
    }
    if let Some(token) = &args.token {
        config.api_token = Some(token.clone());
    }
    if let Some(max_connections) = args.max_connections {
        config.pool.max_connections = usize::from(max_connections);
    }
    if let Some(retry_attempts) = args.retry_attempts {
        config.pool.retry_attempts = u32::from(retry_attempts);
    }

    config.validate().context("invalid configuration")?;
    debug!(base_url = %config.base_url, "configuration ready");
    Ok(config)
}

async fn run_command(client: &OptimizedClient, config: &ClientConfig, args: &Args) -> Result<()> {
    match &args.command {
        Command::Create(job) => {
            let job = client.create_job(create_request(job)).await?;
            print_json(&job)
        }
        Command::Status { job_id } => {
            let job = client.get_status(job_id).await?;
            print_json(&job)
        }
        Command::Cancel { job_id } => {
            let job = client.cancel_job(job_id).await?;
            print_json(&job)
        }
        Command::Wait {
            job_id,
            timeout_secs,
        } => {
            let job = wait(client, config, job_id, *timeout_secs, args.quiet).await?;
            print_json(&job)
        }
        Command::Fetch { job_id, output } => {
            let bytes = fetch_to_file(client, job_id, output).await?;
            print_json(&json!({
                "job_id": job_id,
                "bytes": bytes,
                "output": output.display().to_string(),
            }))
        }
        Command::Run {
            job,
            output,
            timeout_secs,
        } => {
            let created = client.create_job(create_request(job)).await?;
            info!(job_id = %created.id, "job created, waiting for completion");

            let finished = wait(client, config, &created.id, *timeout_secs, args.quiet).await?;
            if finished.status != JobStatus::Completed {
                bail!(
                    "job {} finished as {}{}",
                    finished.id,
                    finished.status,
                    finished
                        .error
                        .as_deref()
                        .map(|e| format!(": {e}"))
                        .unwrap_or_default()
                );
            }

            let bytes = fetch_to_file(client, &finished.id, output).await?;
            print_json(&json!({
                "job": finished,
                "bytes": bytes,
                "output": output.display().to_string(),
            }))
        }
        Command::Stats => {
            let mut shown = config.clone();
            if shown.api_token.is_some() {
                shown.api_token = Some("<redacted>".to_string());
            }
            print_json(&json!({
                "config": shown,
                "stats": client.stats(),
            }))
        }
    }
}

fn create_request(job: &JobArgs) -> CreateJobRequest {
    let request = CreateJobRequest::new(&job.account, &job.target);
    match &job.save_to {
        Some(location) => request.with_save_location(location),
        None => request,
    }
}

/// Polls with a spinner on interactive terminals.
async fn wait(
    client: &OptimizedClient,
    config: &ClientConfig,
    job_id: &str,
    timeout_secs: Option<u64>,
    quiet: bool,
) -> Result<Job> {
    let mut polling = config.polling.clone();
    if let Some(secs) = timeout_secs {
        polling.timeout_ms = secs.saturating_mul(1_000);
    }

    let spinner = if quiet || !io::stderr().is_terminal() {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    };
    spinner.set_message(format!("Waiting for job {job_id}..."));

    let result = client
        .wait_for_completion_with(job_id, &polling, |job| {
            spinner.set_message(format!("Job {} is {}...", job.id, job.status));
        })
        .await;

    spinner.finish_and_clear();
    let job = result.with_context(|| format!("failed waiting for job {job_id}"))?;
    info!(job_id = %job.id, status = %job.status, "job finished");
    Ok(job)
}

async fn fetch_to_file(client: &OptimizedClient, job_id: &str, output: &Path) -> Result<usize> {
    let bytes = client
        .fetch_result(job_id)
        .await
        .with_context(|| format!("failed to fetch result of job {job_id}"))?;
    tokio::fs::write(output, &bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(job_id, bytes = bytes.len(), output = %output.display(), "result saved");
    Ok(bytes.len())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
