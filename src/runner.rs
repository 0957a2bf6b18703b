use crate::cleaner::Maintenance;
use crate::executor::JobExecutor;
use crate::job_registry::HandlerRegistry;
use crate::storage::{CleanupPolicy, JobStore};
use crate::worker::{Worker, WorkerConfig};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

/// Marker type for a configured runner
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Configured;
/// Marker type for an unconfigured runner
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Unconfigured;

/// Starts and supervises worker loops for one or more queues.
///
/// All workers share one store, one handler registry and one cancellation token.
pub struct Runner<S, State = Unconfigured> {
    store: S,
    registry: Arc<HandlerRegistry>,
    queues: HashMap<String, Queue>,
    shutdown_when_queue_empty: bool,
    _state: PhantomData<State>,
}

impl<S, State: std::fmt::Debug> std::fmt::Debug for Runner<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("queues", &self.queues.keys().collect::<Vec<_>>())
            .field("registry", &self.registry)
            .field("shutdown_when_queue_empty", &self.shutdown_when_queue_empty)
            .finish()
    }
}

impl<S: JobStore> Runner<S> {
    /// Create a new runner over `store`, dispatching through `registry`.
    pub fn new(store: S, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            registry,
            queues: HashMap::new(),
            shutdown_when_queue_empty: false,
            _state: PhantomData,
        }
    }
}

impl<S: JobStore, State> Runner<S, State> {
    /// Configure a queue
    pub fn configure_queue(
        mut self,
        queue_name: &str,
        config_fn: impl FnOnce(Queue) -> Queue,
    ) -> Runner<S, Configured> {
        self.queues
            .insert(queue_name.into(), config_fn(Queue::new(queue_name)));

        Runner {
            store: self.store,
            registry: self.registry,
            queues: self.queues,
            shutdown_when_queue_empty: self.shutdown_when_queue_empty,
            _state: PhantomData,
        }
    }

    /// Configure the default queue
    pub fn configure_default_queue(
        self,
        config_fn: impl FnOnce(Queue) -> Queue,
    ) -> Runner<S, Configured> {
        self.configure_queue(crate::DEFAULT_QUEUE, config_fn)
    }

    /// Set the runner to shut down when every queue is empty.
    pub fn shutdown_when_queue_empty(mut self) -> Self {
        self.shutdown_when_queue_empty = true;
        self
    }
}

impl<S: JobStore> Runner<S, Configured> {
    /// Start the background workers.
    ///
    /// This returns a [`RunHandle`] which can be used to stop the workers or
    /// wait for them to shut down.
    pub fn start(&self) -> RunHandle {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        for (queue_name, queue) in &self.queues {
            let mut config = queue.config.clone();
            if self.shutdown_when_queue_empty {
                config = config.shutdown_when_queue_empty();
            }

            // Stopped by `cancel`, or once every worker of the queue has drained it
            let maintenance_cancel = cancel.child_token();
            let mut worker_handles = Vec::new();

            for i in 1..=queue.num_workers {
                let name = format!("background-worker-{queue_name}-{i}");
                info!(worker.name = %name, "Starting worker…");

                let worker = Worker {
                    executor: JobExecutor::new(self.store.clone(), self.registry.clone()),
                    config: config.clone(),
                    cancel: cancel.clone(),
                };

                let span = info_span!("worker", worker.name = %name);
                worker_handles.push(tokio::spawn(async move { worker.run().instrument(span).await }));
            }

            let maintenance = Maintenance::from_config(self.store.clone(), &config);
            let span = info_span!("maintenance", queue = %queue_name);
            handles.push(tokio::spawn(
                async move {
                    let workers = async {
                        join_all(worker_handles).await.into_iter().for_each(log_panic);
                        maintenance_cancel.cancel();
                    };
                    tokio::join!(workers, maintenance.run(maintenance_cancel.clone()));
                }
                .instrument(span),
            ));
        }

        RunHandle { handles, cancel }
    }
}

fn log_panic(result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        warn!(%error, "Background worker task panicked");
    }
}

/// Handle to a running background job processing system
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// The token that stops every worker of this runner.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask all workers to stop and wait for them.
    ///
    /// Jobs that are already running are finished first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.wait_for_shutdown().await;
    }

    /// Wait for all background workers to shut down.
    pub async fn wait_for_shutdown(self) {
        join_all(self.handles).await.into_iter().for_each(log_panic);
    }
}

/// Worker settings for one queue of a [`Runner`]
#[derive(Debug, Clone)]
pub struct Queue {
    num_workers: usize,
    config: WorkerConfig,
}

impl Queue {
    fn new(queue_name: &str) -> Self {
        Self {
            num_workers: 1,
            config: WorkerConfig::for_queue(queue_name),
        }
    }

    /// Set the number of concurrent workers for this queue.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set how often workers poll for new jobs.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.config = self.config.poll_interval(poll_interval);
        self
    }

    /// Set the maximum random jitter to add to poll intervals.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config = self.config.jitter(jitter);
        self
    }

    /// Set how long a claimed job stays leased to its worker.
    pub fn lock_duration(mut self, lock_duration: Duration) -> Self {
        self.config = self.config.lock_duration(lock_duration);
        self
    }

    /// Set how often expired leases are recovered.
    pub fn stale_check_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.stale_check_interval(interval);
        self
    }

    /// Set how often old terminal jobs are deleted.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.cleanup_interval(interval);
        self
    }

    /// Set the retention thresholds used by periodic cleanup.
    pub fn cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.config = self.config.cleanup_policy(policy);
        self
    }
}
