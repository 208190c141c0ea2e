//! `toolpipe` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: validate a job JSON file (graph and every step's configuration).
//! - `order`: print the execution order of a job.
//! - `run`: execute a job; the exit status is non-zero if any step failed.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::{ExecutorConfig, Job, JobDefinition, JobExecutor};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "toolpipe",
    about = "Run tools and dependency-ordered jobs with a guaranteed lifecycle",
    version
)]
struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. `debug` or `engine=trace`.
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a job definition JSON file.
    Validate {
        /// Path to the job JSON file.
        path: PathBuf,
    },
    /// Print the order in which the job's steps would run.
    Order {
        path: PathBuf,
    },
    /// Validate and execute a job.
    Run {
        path: PathBuf,
        /// Keep running steps that do not depend on a failed step.
        #[arg(long)]
        keep_going: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    match execute(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Validate { path } => {
            let job = load_job(&path)?;
            match job.validate() {
                Ok(order) => {
                    println!("Job '{}' is valid. Execution order: {order:?}", job.name());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("Validation failed: {e}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Order { path } => {
            let job = load_job(&path)?;
            for step in job.execution_order()? {
                println!("{step}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { path, keep_going } => {
            let job = load_job(&path)?;
            let executor = JobExecutor::new(ExecutorConfig {
                keep_going,
                ..ExecutorConfig::default()
            });

            let report = executor.run_with_report(&job)?;
            for (step, err) in &report.failed {
                error!(step = %step, "{err}");
            }
            if report.is_success() {
                info!("job '{}' finished: {} steps", report.job, report.completed.len());
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!(
                    "Job '{}' failed: {} failed, {} skipped",
                    report.job,
                    report.failed.len(),
                    report.skipped.len()
                );
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn load_job(path: &Path) -> anyhow::Result<Job> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let definition: JobDefinition = serde_json::from_str(&content)
        .with_context(|| format!("invalid job definition in {}", path.display()))?;
    Ok(definition.into_job(&engine::logging_listeners())?)
}
