use super::{CleanupPolicy, CleanupReport, JobStats, JobStore, ListJobsQuery, NewJob, retry_backoff};
use crate::errors::StoreError;
use crate::schema::{Job, JobId, JobStatus};
use crate::util::to_millis;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, instrument};

const JOB_COLUMNS: &str = "id, queue, job_type, payload, status, attempts, max_attempts, \
     run_at, locked_until, last_error, created_at, completed_at";

/// Runs the embedded migrations, creating the `job` table if needed.
pub async fn setup_database(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// [`JobStore`] backed by the `job` table in Postgres.
///
/// All timestamps come from the database clock, so workers on different hosts
/// agree on eligibility and lease expiry.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Wraps an existing connection pool. Call [`setup_database`] first.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl JobStore for PgJobStore {
    #[instrument(name = "job_queue.add_job", skip(self, job), fields(job.type = %job.job_type, job.queue = %job.queue))]
    async fn add_job(&self, job: NewJob) -> Result<Job, StoreError> {
        let sql = format!(
            r"
            INSERT INTO job (queue, job_type, payload, max_attempts, run_at)
            VALUES ($1, $2, $3, $4, CASE WHEN $5::bigint IS NULL THEN NULL ELSE NOW() + $5::bigint * INTERVAL '1 millisecond' END)
            RETURNING {JOB_COLUMNS}
            "
        );

        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(job.queue)
            .bind(job.job_type)
            .bind(job.payload)
            .bind(job.max_attempts)
            .bind(job.delay.map(to_millis))
            .fetch_one(&self.pool)
            .await?;

        Ok(job)
    }

    /// Claims the next job with a single statement. `SKIP LOCKED` makes
    /// concurrent claimers step over rows another transaction is about to take
    /// instead of waiting for it and then updating the same row twice.
    #[instrument(name = "job_queue.claim_job", skip(self))]
    async fn claim_job(&self, queue: &str, lock_duration: Duration) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r"
            UPDATE job
            SET status = 'processing',
                locked_until = NOW() + $2::bigint * INTERVAL '1 millisecond',
                attempts = attempts + 1
            WHERE id = (
                SELECT id
                FROM job
                WHERE queue = $1
                  AND status = 'pending'
                  AND (run_at IS NULL OR run_at <= NOW())
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "
        );

        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(queue)
            .bind(to_millis(lock_duration))
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    #[instrument(name = "job_queue.complete_job", skip(self))]
    async fn complete_job(&self, id: JobId) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE job
            SET status = 'completed', completed_at = NOW(), locked_until = NULL
            WHERE id = $1 AND status <> 'completed'
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(name = "job_queue.fail_job", skip(self, error))]
    async fn fail_job(&self, id: JobId, error: &str) -> Result<JobStatus, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (attempts, max_attempts) = sqlx::query_as::<_, (i32, i32)>(
            "SELECT attempts, max_attempts FROM job WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::JobNotFound(id))?;

        let status = if attempts < max_attempts {
            let backoff = retry_backoff(attempts);
            debug!(?backoff, attempts, "Scheduling retry…");
            sqlx::query(
                r"
                UPDATE job
                SET status = 'pending',
                    run_at = NOW() + $2::bigint * INTERVAL '1 millisecond',
                    locked_until = NULL,
                    last_error = $3
                WHERE id = $1
                ",
            )
            .bind(id)
            .bind(to_millis(backoff))
            .bind(error)
            .execute(&mut *tx)
            .await?;
            JobStatus::Pending
        } else {
            sqlx::query(
                "UPDATE job SET status = 'failed', locked_until = NULL, last_error = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(error)
            .execute(&mut *tx)
            .await?;
            JobStatus::Failed
        };

        tx.commit().await?;
        Ok(status)
    }

    #[instrument(name = "job_queue.recover_stale_jobs", skip(self))]
    async fn recover_stale_jobs(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE job
            SET status = 'pending', locked_until = NULL
            WHERE status = 'processing' AND locked_until <= NOW()
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[instrument(name = "job_queue.cleanup_jobs", skip(self))]
    async fn cleanup_jobs(&self, policy: CleanupPolicy) -> Result<CleanupReport, StoreError> {
        let completed = sqlx::query(
            r"
            DELETE FROM job
            WHERE status = 'completed'
              AND completed_at < NOW() - $1::bigint * INTERVAL '1 millisecond'
            ",
        )
        .bind(to_millis(policy.completed_older_than))
        .execute(&self.pool)
        .await?
        .rows_affected();

        let failed = sqlx::query(
            r"
            DELETE FROM job
            WHERE status = 'failed'
              AND created_at < NOW() - $1::bigint * INTERVAL '1 millisecond'
            ",
        )
        .bind(to_millis(policy.failed_older_than))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(CleanupReport { completed, failed })
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job WHERE id = $1");
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn list_jobs(&self, query: ListJobsQuery) -> Result<Vec<Job>, StoreError> {
        let limit = query.effective_limit();

        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {JOB_COLUMNS} FROM job WHERE TRUE"));
        if let Some(queue) = query.queue {
            builder.push(" AND queue = ").push_bind(queue);
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status);
        }
        builder
            .push(" ORDER BY created_at ASC, id ASC LIMIT ")
            .push_bind(limit);

        let jobs = builder.build_query_as::<Job>().fetch_all(&self.pool).await?;
        Ok(jobs)
    }

    async fn job_stats(&self, queue: Option<&str>) -> Result<JobStats, StoreError> {
        let rows = sqlx::query_as::<_, (JobStatus, i64)>(
            r"
            SELECT status, COUNT(*)
            FROM job
            WHERE $1::text IS NULL OR queue = $1
            GROUP BY status
            ",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = JobStats::default();
        for (status, count) in rows {
            stats.add(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(stats)
    }
}
