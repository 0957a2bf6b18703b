//! An invitation flow that sends its emails through the job queue.
//!
//! Runs entirely in memory, no database needed:
//!
//! ```bash
//! cargo run --example email_worker
//! ```

use anyhow::{Result, bail};
use job_queue::{BackgroundJob, HandlerRegistry, JobQueue, JobStatus, ListJobsQuery, MemoryJobStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Pretend mail transport, counting what it delivered
#[derive(Clone, Debug, Default)]
struct Mailer {
    sent: Arc<AtomicUsize>,
}

#[derive(Serialize, Deserialize, Debug)]
struct SendInvitationEmail {
    workspace: String,
    email: String,
}

impl BackgroundJob for SendInvitationEmail {
    const JOB_TYPE: &'static str = "send-invitation-email";
    const QUEUE: &'static str = "email";
    const MAX_ATTEMPTS: i32 = 1;
    type Context = Mailer;

    async fn run(&self, mailer: Self::Context) -> Result<()> {
        if !self.email.contains('@') {
            bail!("invalid recipient address: {}", self.email);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        info!("Invited {} to {}", self.email, self.workspace);
        mailer.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn invite_members(queue: &JobQueue<MemoryJobStore>, workspace: &str, emails: &[&str]) -> Result<()> {
    for email in emails {
        let job = SendInvitationEmail {
            workspace: workspace.to_owned(),
            email: (*email).to_owned(),
        };
        let job = queue.enqueue(&job).await?;
        info!(job.id = job.id, "Queued invitation for {email}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mailer = Mailer::default();
    let mut registry = HandlerRegistry::new();
    registry.register_job::<SendInvitationEmail>(mailer.clone());

    let queue = JobQueue::new(MemoryJobStore::new(), registry);

    invite_members(
        &queue,
        "acme",
        &["ada@example.com", "grace@example.com", "not-an-address", "linus@example.com"],
    )
    .await?;

    let runner = queue
        .runner()
        .configure_queue(SendInvitationEmail::QUEUE, |queue| {
            queue.num_workers(2).poll_interval(Duration::from_millis(100))
        })
        .shutdown_when_queue_empty();

    runner.start().wait_for_shutdown().await;

    let stats = queue.job_stats(Some(SendInvitationEmail::QUEUE)).await?;
    info!(?stats, sent = mailer.sent.load(Ordering::SeqCst), "All invitations processed");

    let failed = queue
        .list_jobs(ListJobsQuery {
            status: Some(JobStatus::Failed),
            ..Default::default()
        })
        .await?;
    for job in failed {
        info!(job.id = job.id, error = ?job.last_error, "Invitation could not be sent");
    }

    Ok(())
}
