use crate::storage::{CleanupPolicy, JobStore};
use crate::worker::WorkerConfig;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// `interval` rejects a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Periodic upkeep next to a worker: recovering expired leases and deleting
/// terminal jobs past their retention.
///
/// Both run once right away and then on their own interval. Errors are logged
/// and never end the loop.
pub(crate) struct Maintenance<S> {
    store: S,
    stale_check_interval: Duration,
    cleanup_interval: Duration,
    cleanup_policy: CleanupPolicy,
}

impl<S: JobStore> Maintenance<S> {
    pub(crate) fn from_config(store: S, config: &WorkerConfig) -> Self {
        Self {
            store,
            stale_check_interval: config.stale_check_interval,
            cleanup_interval: config.cleanup_interval,
            cleanup_policy: config.cleanup_policy,
        }
    }

    pub(crate) async fn run(self, cancel: CancellationToken) {
        let mut stale_ticker = interval(self.stale_check_interval.max(MIN_PERIOD));
        stale_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_ticker = interval(self.cleanup_interval.max(MIN_PERIOD));
        cleanup_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = stale_ticker.tick() => self.recover_stale_jobs().await,
                _ = cleanup_ticker.tick() => self.cleanup_jobs().await,
            }
        }

        debug!("Maintenance stopped");
    }

    async fn recover_stale_jobs(&self) {
        match self.store.recover_stale_jobs().await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Recovered jobs with expired leases"),
            Err(error) => error!("Failed to recover stale jobs: {error}"),
        }
    }

    async fn cleanup_jobs(&self) {
        match self.store.cleanup_jobs(self.cleanup_policy).await {
            Ok(report) if report.completed + report.failed > 0 => info!(
                completed = report.completed,
                failed = report.failed,
                "Deleted old jobs"
            ),
            Ok(_) => {}
            Err(error) => error!("Failed to clean up old jobs: {error}"),
        }
    }
}
