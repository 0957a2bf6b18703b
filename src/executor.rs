use crate::errors::StoreError;
use crate::job_registry::HandlerRegistry;
use crate::schema::Job;
use crate::storage::JobStore;
use crate::util::try_to_extract_panic_info;
use anyhow::anyhow;
use futures_util::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info_span, trace, warn};

/// Result of one claim-and-run cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing was eligible in the queue
    NoJobAvailable,
    /// The handler finished and the job is now `completed`
    Succeeded {
        /// The job as it was claimed
        job: Job,
    },
    /// The job failed and was rescheduled or marked `failed`
    Failed {
        /// The job as it was claimed
        job: Job,
        /// The message stored in `last_error`
        error: String,
    },
}

impl ProcessOutcome {
    /// Whether a job was claimed.
    pub fn processed(&self) -> bool {
        !matches!(self, Self::NoJobAvailable)
    }

    /// Whether a job was claimed and succeeded.
    pub fn success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// The claimed job, if any.
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::NoJobAvailable => None,
            Self::Succeeded { job } | Self::Failed { job, .. } => Some(job),
        }
    }

    /// The failure message, if the job failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Runs single jobs: claim, dispatch to the registered handler, record the outcome.
///
/// Holds no state between calls, so one executor (or many clones) can be driven
/// from any number of workers at once.
#[derive(Debug, Clone)]
pub struct JobExecutor<S> {
    store: S,
    registry: Arc<HandlerRegistry>,
}

impl<S: JobStore> JobExecutor<S> {
    /// Creates an executor over `store` dispatching through `registry`.
    pub fn new(store: S, registry: Arc<HandlerRegistry>) -> Self {
        Self { store, registry }
    }

    /// Claims the next eligible job of `queue` and runs it.
    ///
    /// Handler failures are not errors here: they are recorded on the job and
    /// reported as [`ProcessOutcome::Failed`]. Only store failures are returned
    /// as `Err`.
    pub async fn process_job(
        &self,
        queue: &str,
        lock_duration: Duration,
    ) -> Result<ProcessOutcome, StoreError> {
        trace!("Looking for next job…");

        let Some(job) = self.store.claim_job(queue, lock_duration).await? else {
            return Ok(ProcessOutcome::NoJobAvailable);
        };

        let span = info_span!(
            "job",
            job.id = %job.id,
            job.type = %job.job_type,
            job.queue = %job.queue,
            job.attempt = job.attempts,
        );

        async move {
            debug!("Running job…");
            match self.run(&job).await {
                Ok(()) => {
                    debug!("Completing successful job…");
                    self.store.complete_job(job.id).await?;
                    Ok(ProcessOutcome::Succeeded { job })
                }
                Err(error) => {
                    let error = format!("{error:#}");
                    let status = self.store.fail_job(job.id, &error).await?;
                    warn!(%status, "Failed to run job: {error}");
                    Ok(ProcessOutcome::Failed { job, error })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, job: &Job) -> anyhow::Result<()> {
        let handler = self
            .registry
            .get(&job.job_type)
            .ok_or_else(|| anyhow!("No handler registered for job type: {}", job.job_type))?;

        let payload: Value = serde_json::from_str(&job.payload)
            .map_err(|error| anyhow!("Invalid job payload: {error}"))?;

        // Calling the handler happens inside the guarded future, so a panic
        // before its first await is caught too
        AssertUnwindSafe(async move { handler(payload).await })
            .catch_unwind()
            .await
            .map_err(|e| try_to_extract_panic_info(&*e))
            .and_then(std::convert::identity)
    }
}
