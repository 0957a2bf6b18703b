//! A [`JobStore`] over [`MemoryJobStore`] that counts calls and can fail the
//! first few reads and maintenance calls.

use job_queue::{
    CleanupPolicy, CleanupReport, Job, JobId, JobStats, JobStatus, JobStore, ListJobsQuery,
    MemoryJobStore, NewJob, StoreError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Calls(AtomicUsize);

impl Calls {
    fn record(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    inner: MemoryJobStore,
    fail_first: usize,
    pub claims: Arc<Calls>,
    pub recoveries: Arc<Calls>,
    pub cleanups: Arc<Calls>,
    pub writes: Arc<Calls>,
}

impl FlakyStore {
    /// `claim_job`, `recover_stale_jobs` and `cleanup_jobs` each fail their
    /// first `fail_first` calls.
    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }

    fn check(&self, calls: &Calls) -> Result<(), StoreError> {
        if calls.record() < self.fail_first {
            return Err(StoreError::JobNotFound(0));
        }
        Ok(())
    }
}

impl JobStore for FlakyStore {
    async fn add_job(&self, job: NewJob) -> Result<Job, StoreError> {
        self.inner.add_job(job).await
    }

    async fn claim_job(&self, queue: &str, lock_duration: Duration) -> Result<Option<Job>, StoreError> {
        self.check(&self.claims)?;
        self.inner.claim_job(queue, lock_duration).await
    }

    async fn complete_job(&self, id: JobId) -> Result<(), StoreError> {
        self.writes.record();
        self.inner.complete_job(id).await
    }

    async fn fail_job(&self, id: JobId, error: &str) -> Result<JobStatus, StoreError> {
        self.writes.record();
        self.inner.fail_job(id, error).await
    }

    async fn recover_stale_jobs(&self) -> Result<u64, StoreError> {
        self.check(&self.recoveries)?;
        self.inner.recover_stale_jobs().await
    }

    async fn cleanup_jobs(&self, policy: CleanupPolicy) -> Result<CleanupReport, StoreError> {
        self.check(&self.cleanups)?;
        self.inner.cleanup_jobs(policy).await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self, query: ListJobsQuery) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs(query).await
    }

    async fn job_stats(&self, queue: Option<&str>) -> Result<JobStats, StoreError> {
        self.inner.job_stats(queue).await
    }
}
