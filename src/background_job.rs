use crate::errors::EnqueueError;
use crate::schema::Job;
use crate::storage::{DEFAULT_MAX_ATTEMPTS, EnqueueOptions, JobStore, NewJob};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::instrument;

/// The default queue name used when no specific queue is specified.
pub const DEFAULT_QUEUE: &str = "default";

/// Trait for defining background jobs that can be enqueued and executed asynchronously.
///
/// The job value itself is the payload: it is serialized on enqueue and
/// deserialized again right before [`run`](BackgroundJob::run).
pub trait BackgroundJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name of the task.
    ///
    /// This MUST be unique for the whole application.
    const JOB_TYPE: &'static str;

    /// Job queue where this job will be executed.
    const QUEUE: &'static str = DEFAULT_QUEUE;

    /// How many times the job is claimed before it is marked failed.
    const MAX_ATTEMPTS: i32 = DEFAULT_MAX_ATTEMPTS;

    /// The application data provided to this job at runtime.
    type Context: Clone + Send + Sync + 'static;

    /// Execute the task. This method should define its logic.
    ///
    /// A job can run more than once, so the work should be idempotent.
    fn run(&self, ctx: Self::Context) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Options matching this job's queue and attempt budget.
    fn enqueue_options() -> EnqueueOptions {
        EnqueueOptions::default()
            .queue(Self::QUEUE)
            .max_attempts(Self::MAX_ATTEMPTS)
    }

    /// Enqueue this job for background execution.
    #[instrument(name = "job_queue.enqueue", skip(self, store), fields(message = Self::JOB_TYPE))]
    fn enqueue<S: JobStore>(&self, store: &S) -> impl Future<Output = Result<Job, EnqueueError>> + Send {
        let new_job = NewJob::new(Self::JOB_TYPE, self, Self::enqueue_options());
        async move { Ok(store.add_job(new_job?).await?) }
    }

    /// Enqueue this job so that it does not run before `delay` has passed.
    fn enqueue_with_delay<S: JobStore>(
        &self,
        store: &S,
        delay: Duration,
    ) -> impl Future<Output = Result<Job, EnqueueError>> + Send {
        let new_job = NewJob::new(Self::JOB_TYPE, self, Self::enqueue_options().delay(delay));
        async move { Ok(store.add_job(new_job?).await?) }
    }
}
