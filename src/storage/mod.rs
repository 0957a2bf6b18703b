//! Persistence of jobs.
//!
//! [`JobStore`] is the only component allowed to change a job's `status`,
//! `locked_until` or `attempts`. Two implementations ship with the crate:
//!
//! - [`PgJobStore`] keeps jobs in a Postgres table and claims them with
//!   `FOR UPDATE SKIP LOCKED`, so any number of processes can share it.
//! - [`MemoryJobStore`] keeps jobs in process memory behind a mutex. Useful for
//!   tests, demos and single-process embedding.

mod memory;
mod postgres;

pub use self::memory::MemoryJobStore;
pub use self::postgres::{PgJobStore, setup_database};

use crate::background_job::DEFAULT_QUEUE;
use crate::errors::{EnqueueError, StoreError};
use crate::schema::{Job, JobId, JobStatus};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Attempts a job gets unless the producer says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Default number of jobs returned by [`JobStore::list_jobs`].
pub const DEFAULT_LIST_LIMIT: i64 = 100;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Delay before a job that failed on its `attempts`-th claim becomes eligible again.
///
/// `min(1s * 2^attempts, 5min)`
pub fn retry_backoff(attempts: i32) -> Duration {
    let exponent = u32::try_from(attempts).unwrap_or(0);
    2_u32
        .checked_pow(exponent)
        .and_then(|factor| BASE_BACKOFF.checked_mul(factor))
        .map_or(MAX_BACKOFF, |backoff| backoff.min(MAX_BACKOFF))
}

/// Producer-side knobs for a single job.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Queue to put the job in; `"default"` when unset
    pub queue: Option<String>,
    /// Do not run the job before `now + delay`
    pub delay: Option<Duration>,
    /// How many claims the job gets before it is marked failed; 3 when unset
    pub max_attempts: Option<i32>,
}

impl EnqueueOptions {
    /// Put the job in `queue`.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Hold the job back for `delay`.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Allow at most `max_attempts` claims.
    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// A validated job that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    /// Target queue
    pub queue: String,
    /// Dispatch key into the handler registry
    pub job_type: String,
    /// JSON-encoded payload
    pub payload: String,
    /// Initial eligibility delay
    pub delay: Option<Duration>,
    /// Fixed attempt budget, at least 1
    pub max_attempts: i32,
}

impl NewJob {
    /// Serializes `payload` and applies `options`.
    pub fn new<P: Serialize + ?Sized>(
        job_type: impl Into<String>,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<Self, EnqueueError> {
        let max_attempts = options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts < 1 {
            return Err(EnqueueError::InvalidMaxAttempts(max_attempts));
        }

        Ok(Self {
            queue: options.queue.unwrap_or_else(|| DEFAULT_QUEUE.to_owned()),
            job_type: job_type.into(),
            payload: serde_json::to_string(payload)?,
            delay: options.delay,
            max_attempts,
        })
    }
}

/// Filters for [`JobStore::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct ListJobsQuery {
    /// Only jobs in this queue
    pub queue: Option<String>,
    /// Only jobs with this status
    pub status: Option<JobStatus>,
    /// Maximum number of rows; [`DEFAULT_LIST_LIMIT`] when unset
    pub limit: Option<i64>,
}

impl ListJobsQuery {
    pub(crate) fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(0)
    }
}

/// Retention thresholds used by [`JobStore::cleanup_jobs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    /// Completed jobs are deleted once `completed_at` is older than this
    pub completed_older_than: Duration,
    /// Failed jobs are deleted once `created_at` is older than this
    pub failed_older_than: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            completed_older_than: Duration::from_secs(7 * 24 * 60 * 60),
            failed_older_than: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Rows deleted by a cleanup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Deleted `completed` jobs
    pub completed: u64,
    /// Deleted `failed` jobs
    pub failed: u64,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    /// Jobs waiting to be claimed, including those backing off
    pub pending: u64,
    /// Jobs currently leased to a worker
    pub processing: u64,
    /// Jobs whose handler succeeded
    pub completed: u64,
    /// Jobs that used up their attempts
    pub failed: u64,
}

impl JobStats {
    pub(crate) fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    /// Jobs across all statuses.
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Persistence backend for jobs.
///
/// Implementations must make [`claim_job`](JobStore::claim_job) atomic: under any
/// number of concurrent callers each eligible job is handed to exactly one of them.
pub trait JobStore: Clone + Send + Sync + 'static {
    /// Inserts a `pending` job with zero attempts.
    fn add_job(&self, job: NewJob) -> impl Future<Output = Result<Job, StoreError>> + Send;

    /// Claims the oldest eligible job of `queue`, moving it to `processing`,
    /// leasing it for `lock_duration` and counting an attempt.
    ///
    /// Returns `None` when nothing is eligible.
    fn claim_job(
        &self,
        queue: &str,
        lock_duration: Duration,
    ) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// Marks a job as completed. Calling it again is a no-op.
    fn complete_job(&self, id: JobId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Records a failure. The job goes back to `pending` after [`retry_backoff`]
    /// while attempts remain, otherwise it becomes `failed`.
    ///
    /// Returns the status the job ended up in.
    fn fail_job(
        &self,
        id: JobId,
        error: &str,
    ) -> impl Future<Output = Result<JobStatus, StoreError>> + Send;

    /// Puts `processing` jobs whose lease ran out back to `pending`, without
    /// touching `attempts`. Returns how many were recovered.
    fn recover_stale_jobs(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Deletes terminal jobs past their retention threshold.
    fn cleanup_jobs(
        &self,
        policy: CleanupPolicy,
    ) -> impl Future<Output = Result<CleanupReport, StoreError>> + Send;

    /// Looks up a single job.
    fn get_job(&self, id: JobId) -> impl Future<Output = Result<Option<Job>, StoreError>> + Send;

    /// Lists jobs in creation order.
    fn list_jobs(
        &self,
        query: ListJobsQuery,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// Counts jobs per status, optionally within one queue.
    fn job_stats(
        &self,
        queue: Option<&str>,
    ) -> impl Future<Output = Result<JobStats, StoreError>> + Send;
}
