use crate::background_job::DEFAULT_QUEUE;
use crate::cleaner::Maintenance;
use crate::executor::JobExecutor;
use crate::job_registry::HandlerRegistry;
use crate::storage::{CleanupPolicy, JobStore};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_JITTER: Duration = Duration::from_millis(100);
const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(5 * 60);
const DEFAULT_STALE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Settings of a single worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub(crate) queue: String,
    pub(crate) poll_interval: Duration,
    pub(crate) jitter: Duration,
    pub(crate) lock_duration: Duration,
    pub(crate) stale_check_interval: Duration,
    pub(crate) cleanup_interval: Duration,
    pub(crate) cleanup_policy: CleanupPolicy,
    pub(crate) shutdown_when_queue_empty: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            jitter: DEFAULT_JITTER,
            lock_duration: DEFAULT_LOCK_DURATION,
            stale_check_interval: DEFAULT_STALE_CHECK_INTERVAL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            cleanup_policy: CleanupPolicy::default(),
            shutdown_when_queue_empty: false,
        }
    }
}

impl WorkerConfig {
    /// Default settings for `queue`.
    pub fn for_queue(queue: impl Into<String>) -> Self {
        Self::default().queue(queue)
    }

    /// Set the queue to claim jobs from.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set how often the worker polls for new jobs when the queue is empty.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the maximum random jitter to add to poll intervals.
    ///
    /// Jitter helps reduce thundering herd effects when multiple workers
    /// are polling for jobs simultaneously. The actual jitter applied will
    /// be a random value between 0 and the specified duration.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set how long a claimed job stays leased to this worker.
    ///
    /// A handler running longer than this can be recovered as stale and claimed
    /// a second time while still running.
    pub fn lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    /// Set how often expired leases are recovered.
    pub fn stale_check_interval(mut self, interval: Duration) -> Self {
        self.stale_check_interval = interval;
        self
    }

    /// Set how often old terminal jobs are deleted.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the retention thresholds used by periodic cleanup.
    pub fn cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = policy;
        self
    }

    /// Stop the worker the first time its queue has no eligible job.
    pub fn shutdown_when_queue_empty(mut self) -> Self {
        self.shutdown_when_queue_empty = true;
        self
    }

    /// The queue this worker claims from.
    pub fn queue_name(&self) -> &str {
        &self.queue
    }
}

/// Processes `config.queue` until `cancel` fires, recovering stale jobs and
/// cleaning up old ones on their own timers in the meantime.
///
/// A job that is already running when `cancel` fires is finished and recorded;
/// no new job is claimed afterwards.
pub async fn run_worker<S: JobStore>(
    store: S,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    cancel: CancellationToken,
) {
    let maintenance = Maintenance::from_config(store.clone(), &config);
    let maintenance_cancel = cancel.child_token();

    let worker = Worker {
        executor: JobExecutor::new(store, registry),
        config,
        cancel,
    };

    let poll = async {
        worker.run().await;
        // A drained worker stops its maintenance too
        maintenance_cancel.cancel();
    };

    tokio::join!(poll, maintenance.run(maintenance_cancel.clone()));
}

pub(crate) struct Worker<S> {
    pub(crate) executor: JobExecutor<S>,
    pub(crate) config: WorkerConfig,
    pub(crate) cancel: CancellationToken,
}

impl<S: JobStore> Worker<S> {
    /// Calculate the sleep duration with random jitter applied.
    fn sleep_duration_with_jitter(&self) -> Duration {
        if self.config.jitter.is_zero() {
            return self.config.poll_interval;
        }

        let jitter_millis = u64::try_from(self.config.jitter.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        self.config.poll_interval + Duration::from_millis(random_jitter)
    }

    /// Run jobs until cancelled, or until the queue is empty if `shutdown_when_queue_empty` is set.
    #[allow(clippy::cognitive_complexity)]
    pub(crate) async fn run(&self) {
        let queue = &self.config.queue;
        let lock_duration = self.config.lock_duration;

        while !self.cancel.is_cancelled() {
            match self.executor.process_job(queue, lock_duration).await {
                // Drain a backlog before going back to sleep
                Ok(outcome) if outcome.processed() => continue,
                Ok(_) if self.config.shutdown_when_queue_empty => {
                    debug!("No pending jobs found. Shutting down the worker…");
                    break;
                }
                Ok(_) => {
                    trace!("No pending jobs found. Polling again soon…");
                }
                Err(error) => {
                    error!("Failed to fetch or update job: {error}");
                }
            }

            let sleep_duration = self.sleep_duration_with_jitter();
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = sleep(sleep_duration) => {}
            }
        }

        debug!("Worker stopped");
    }
}
