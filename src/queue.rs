//! The administrative surface: everything producers and operators need,
//! bundled over one store and one handler registry.

use crate::background_job::BackgroundJob;
use crate::errors::{EnqueueError, StoreError};
use crate::executor::{JobExecutor, ProcessOutcome};
use crate::job_registry::HandlerRegistry;
use crate::runner::Runner;
use crate::schema::{Job, JobId};
use crate::storage::{
    CleanupPolicy, CleanupReport, EnqueueOptions, JobStats, JobStore, ListJobsQuery, NewJob,
};
use crate::worker::{WorkerConfig, run_worker};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// A job queue over `S`.
///
/// Cheap to clone; clones share the store and the registry.
#[derive(Debug, Clone)]
pub struct JobQueue<S> {
    store: S,
    registry: Arc<HandlerRegistry>,
}

impl<S: JobStore> JobQueue<S> {
    /// Creates a queue over `store`, dispatching jobs through `registry`.
    pub fn new(store: S, registry: HandlerRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The handler registry shared with every worker started from this queue.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Enqueues a job of type `job_type` with `payload` serialized as JSON.
    #[instrument(name = "job_queue.enqueue", skip(self, payload), fields(job.type = job_type))]
    pub async fn add_job<P: Serialize + ?Sized>(
        &self,
        job_type: &str,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<Job, EnqueueError> {
        let job = NewJob::new(job_type, payload, options)?;
        Ok(self.store.add_job(job).await?)
    }

    /// Enqueues a typed job.
    pub async fn enqueue<J: BackgroundJob>(&self, job: &J) -> Result<Job, EnqueueError> {
        job.enqueue(&self.store).await
    }

    /// Looks up a job by id.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.store.get_job(id).await
    }

    /// Lists jobs in creation order.
    pub async fn list_jobs(&self, query: ListJobsQuery) -> Result<Vec<Job>, StoreError> {
        self.store.list_jobs(query).await
    }

    /// Counts jobs per status, optionally within one queue.
    pub async fn job_stats(&self, queue: Option<&str>) -> Result<JobStats, StoreError> {
        self.store.job_stats(queue).await
    }

    /// Claims and runs at most one job of `queue`.
    pub async fn process_job(
        &self,
        queue: &str,
        lock_duration: Duration,
    ) -> Result<ProcessOutcome, StoreError> {
        JobExecutor::new(self.store.clone(), self.registry.clone())
            .process_job(queue, lock_duration)
            .await
    }

    /// Resets jobs whose lease expired back to `pending`.
    pub async fn recover_stale_jobs(&self) -> Result<u64, StoreError> {
        let recovered = self.store.recover_stale_jobs().await?;
        info!(recovered, "Recovered stale jobs");
        Ok(recovered)
    }

    /// Deletes terminal jobs older than the thresholds of `policy`.
    pub async fn cleanup_jobs(&self, policy: CleanupPolicy) -> Result<CleanupReport, StoreError> {
        let report = self.store.cleanup_jobs(policy).await?;
        info!(completed = report.completed, failed = report.failed, "Cleaned up jobs");
        Ok(report)
    }

    /// Runs a single worker loop until `cancel` fires.
    pub async fn run_worker(&self, config: WorkerConfig, cancel: CancellationToken) {
        run_worker(self.store.clone(), self.registry.clone(), config, cancel).await;
    }

    /// A [`Runner`] for starting several workers over this queue's store and registry.
    pub fn runner(&self) -> Runner<S> {
        Runner::new(self.store.clone(), self.registry.clone())
    }
}
