use crate::schema::JobId;
use thiserror::Error;

/// Errors raised by a [`JobStore`](crate::JobStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database returned an error or could not be reached
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The embedded migrations could not be applied
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// No job with the given id exists
    #[error("job {0} not found")]
    JobNotFound(JobId),
}

/// Errors that can occur while enqueueing a job.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The payload could not be serialized to JSON
    #[error("failed to serialize job payload: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// `max_attempts` must allow at least one run
    #[error("max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(i32),

    /// The store rejected the insert
    #[error(transparent)]
    Store(#[from] StoreError),
}
