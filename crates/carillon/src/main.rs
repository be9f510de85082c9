//! Carillon: recurring-job execution host.
//!
//! Subcommands:
//! - `run`: execute every job in a job file until Ctrl-C
//! - `preview`: print each job's upcoming occurrences without executing

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carillon_runner::{JobConfig, Runner, build_recurrence};

mod exec;

#[derive(Parser)]
#[command(name = "carillon")]
#[command(about = "Recurring-job execution host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every job in the job file until Ctrl-C
    Run {
        /// Path to the JSON job file
        #[arg(long, env = "CARILLON_JOBS")]
        jobs: PathBuf,
    },

    /// Print upcoming occurrences without executing anything
    Preview {
        /// Path to the JSON job file
        #[arg(long, env = "CARILLON_JOBS")]
        jobs: PathBuf,

        /// Occurrences to print per job
        #[arg(long, default_value = "5")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "carillon=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { jobs } => run(&jobs).await,
        Commands::Preview { jobs, count } => preview(&jobs, count),
    }
}

fn load_jobs(path: &Path) -> Result<Vec<JobConfig>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("failed to read job file {}: {}", path.display(), e))?;
    let jobs: Vec<JobConfig> = serde_json::from_str(&raw)
        .map_err(|e| miette::miette!("failed to parse job file {}: {}", path.display(), e))?;
    if jobs.is_empty() {
        return Err(miette::miette!(
            "job file {} contains no jobs",
            path.display()
        ));
    }
    Ok(jobs)
}

async fn run(path: &Path) -> Result<()> {
    let jobs = load_jobs(path)?;
    info!(count = jobs.len(), "loaded jobs");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        if job.command.is_empty() {
            return Err(miette::miette!("job '{}' has no command", job.name));
        }
        let schedule = build_recurrence(&job)
            .map_err(|e| miette::miette!("job '{}': {}", job.name, e))?;
        let executor = exec::spawn_executor(&job);
        let runner = Runner::new(job, schedule);
        handles.push(tokio::spawn(runner.run(shutdown_rx.clone(), executor)));
    }

    for handle in handles {
        let _ = handle.await;
    }

    info!("all runners stopped");
    Ok(())
}

fn preview(path: &Path, count: usize) -> Result<()> {
    let jobs = load_jobs(path)?;
    for job in jobs {
        let mut schedule = build_recurrence(&job)
            .map_err(|e| miette::miette!("job '{}': {}", job.name, e))?;
        println!("{}:", job.name);
        for _ in 0..count {
            match schedule.next_occurrence() {
                Some(occurrence) => println!("  {}", occurrence.to_rfc3339()),
                None => {
                    println!("  (no further occurrences)");
                    break;
                }
            }
        }
    }
    Ok(())
}
