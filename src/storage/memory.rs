use super::{CleanupPolicy, CleanupReport, JobStats, JobStore, ListJobsQuery, NewJob, retry_backoff};
use crate::errors::StoreError;
use crate::schema::{Job, JobId, JobStatus};
use crate::util::{earlier_by, later_by};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    next_id: JobId,
    /// Keyed by id, which increases with creation order.
    jobs: BTreeMap<JobId, Job>,
}

/// In-memory [`JobStore`].
///
/// Every operation runs under one mutex, which makes claims trivially atomic.
/// Clones share the same jobs. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<State>>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a job half-written: every
        // mutation below assigns fields of a single entry.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStore for MemoryJobStore {
    async fn add_job(&self, job: NewJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;

        let job = Job {
            id,
            queue: job.queue,
            job_type: job.job_type,
            payload: job.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: job.max_attempts,
            run_at: job.delay.map(|delay| later_by(now, delay)),
            locked_until: None,
            last_error: None,
            created_at: now,
            completed_at: None,
        };
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn claim_job(&self, queue: &str, lock_duration: Duration) -> Result<Option<Job>, StoreError> {
        let now = Utc::now();
        let mut state = self.lock();

        let Some(job) = state
            .jobs
            .values_mut()
            .find(|job| job.queue == queue && job.is_eligible_at(now))
        else {
            return Ok(None);
        };

        job.status = JobStatus::Processing;
        job.locked_until = Some(later_by(now, lock_duration));
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    async fn complete_job(&self, id: JobId) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut state = self.lock();
        if let Some(job) = state.jobs.get_mut(&id) {
            if job.status != JobStatus::Completed {
                job.status = JobStatus::Completed;
                job.completed_at = Some(now);
                job.locked_until = None;
            }
        }
        Ok(())
    }

    async fn fail_job(&self, id: JobId, error: &str) -> Result<JobStatus, StoreError> {
        let now = Utc::now();
        let mut state = self.lock();
        let job = state.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;

        if job.attempts < job.max_attempts {
            job.status = JobStatus::Pending;
            job.run_at = Some(later_by(now, retry_backoff(job.attempts)));
        } else {
            job.status = JobStatus::Failed;
        }
        job.locked_until = None;
        job.last_error = Some(error.to_owned());
        Ok(job.status)
    }

    async fn recover_stale_jobs(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut state = self.lock();
        let mut recovered = 0;
        for job in state.jobs.values_mut().filter(|job| job.is_stale_at(now)) {
            job.status = JobStatus::Pending;
            job.locked_until = None;
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn cleanup_jobs(&self, policy: CleanupPolicy) -> Result<CleanupReport, StoreError> {
        let now = Utc::now();
        let completed_cutoff = earlier_by(now, policy.completed_older_than);
        let failed_cutoff = earlier_by(now, policy.failed_older_than);

        let mut report = CleanupReport::default();
        let mut state = self.lock();
        state.jobs.retain(|_, job| match job.status {
            JobStatus::Completed if job.completed_at.is_some_and(|at| at < completed_cutoff) => {
                report.completed += 1;
                false
            }
            JobStatus::Failed if job.created_at < failed_cutoff => {
                report.failed += 1;
                false
            }
            _ => true,
        });
        Ok(report)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, query: ListJobsQuery) -> Result<Vec<Job>, StoreError> {
        let limit = usize::try_from(query.effective_limit()).unwrap_or(usize::MAX);
        let state = self.lock();
        let jobs = state
            .jobs
            .values()
            .filter(|job| query.queue.as_ref().is_none_or(|queue| &job.queue == queue))
            .filter(|job| query.status.is_none_or(|status| job.status == status))
            .take(limit)
            .cloned()
            .collect();
        Ok(jobs)
    }

    async fn job_stats(&self, queue: Option<&str>) -> Result<JobStats, StoreError> {
        let state = self.lock();
        let mut stats = JobStats::default();
        for job in state
            .jobs
            .values()
            .filter(|job| queue.is_none_or(|queue| job.queue == queue))
        {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }
}
