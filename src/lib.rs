#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod background_job;
mod cleaner;
mod errors;
mod executor;
mod job_registry;
mod queue;
mod runner;
/// Database schema definitions.
pub mod schema;
pub mod storage;
mod util;
mod worker;

/// The main trait for defining background jobs.
pub use self::background_job::{BackgroundJob, DEFAULT_QUEUE};
/// Error types for enqueueing and storage operations.
pub use self::errors::{EnqueueError, StoreError};
/// Single-job execution.
pub use self::executor::{JobExecutor, ProcessOutcome};
/// Dispatch from job type to handler.
pub use self::job_registry::{HandlerFn, HandlerRegistry};
/// The administrative surface.
pub use self::queue::JobQueue;
/// The main runner that orchestrates job processing.
pub use self::runner::{Configured, Queue, RunHandle, Runner, Unconfigured};
pub use self::schema::{Job, JobId, JobStatus};
pub use self::storage::{
    CleanupPolicy, CleanupReport, EnqueueOptions, JobStats, JobStore, ListJobsQuery,
    MemoryJobStore, NewJob, PgJobStore, retry_backoff, setup_database,
};
/// A single worker loop.
pub use self::worker::{WorkerConfig, run_worker};

pub use tokio_util::sync::CancellationToken;
