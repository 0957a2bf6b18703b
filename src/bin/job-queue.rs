//! Operator CLI for a Postgres-backed job queue.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use job_queue::{
    CleanupPolicy, EnqueueOptions, HandlerRegistry, JobId, JobQueue, JobStatus, ListJobsQuery,
    PgJobStore, setup_database,
};
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Inspect and maintain the job table
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum number of pooled connections
    #[arg(long, env = "JOB_QUEUE_MAX_CONNECTIONS", default_value_t = 2)]
    max_connections: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the job table
    Migrate,
    /// Enqueue a job
    Enqueue {
        /// Job type, used to pick the handler
        job_type: String,
        /// JSON payload
        payload: String,
        #[arg(long)]
        queue: Option<String>,
        /// Do not run before this many milliseconds have passed
        #[arg(long)]
        delay_ms: Option<u64>,
        #[arg(long)]
        max_attempts: Option<i32>,
    },
    /// Show a single job
    Show { id: JobId },
    /// List jobs, oldest first
    List {
        #[arg(long)]
        queue: Option<String>,
        /// pending, processing, completed or failed
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Count jobs per status
    Stats {
        #[arg(long)]
        queue: Option<String>,
    },
    /// Reset jobs with expired leases to pending
    Recover,
    /// Delete old completed and failed jobs
    Cleanup {
        /// Retention for completed jobs, measured from completion (default 7 days)
        #[arg(long)]
        completed_older_than_ms: Option<u64>,
        /// Retention for failed jobs, measured from creation (default 30 days)
        #[arg(long)]
        failed_older_than_ms: Option<u64>,
    },
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .connect(&args.database_url)
        .await
        .context("failed to connect to the database")?;

    // The CLI never runs jobs, so it needs no handlers.
    let queue = JobQueue::new(PgJobStore::new(pool.clone()), HandlerRegistry::new());

    match args.command {
        Command::Migrate => {
            setup_database(&pool).await?;
            eprintln!("Migrations applied");
        }
        Command::Enqueue {
            job_type,
            payload,
            queue: queue_name,
            delay_ms,
            max_attempts,
        } => {
            let payload: Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let options = EnqueueOptions {
                queue: queue_name,
                delay: delay_ms.map(Duration::from_millis),
                max_attempts,
            };
            let job = queue.add_job(&job_type, &payload, options).await?;
            print_json(&job)?;
        }
        Command::Show { id } => {
            let job = queue
                .get_job(id)
                .await?
                .with_context(|| format!("job {id} not found"))?;
            print_json(&job)?;
        }
        Command::List {
            queue: queue_name,
            status,
            limit,
        } => {
            let query = ListJobsQuery {
                queue: queue_name,
                status,
                limit,
            };
            print_json(&queue.list_jobs(query).await?)?;
        }
        Command::Stats { queue: queue_name } => {
            print_json(&queue.job_stats(queue_name.as_deref()).await?)?;
        }
        Command::Recover => {
            let recovered = queue.recover_stale_jobs().await?;
            print_json(&serde_json::json!({ "recovered": recovered }))?;
        }
        Command::Cleanup {
            completed_older_than_ms,
            failed_older_than_ms,
        } => {
            let defaults = CleanupPolicy::default();
            let policy = CleanupPolicy {
                completed_older_than: completed_older_than_ms
                    .map_or(defaults.completed_older_than, Duration::from_millis),
                failed_older_than: failed_older_than_ms
                    .map_or(defaults.failed_older_than, Duration::from_millis),
            };
            print_json(&queue.cleanup_jobs(policy).await?)?;
        }
    }

    Ok(())
}
