//! Behaviour every `JobStore` must show, run against each implementation.

#![allow(dead_code)]

pub mod flaky_store;

use chrono::{TimeDelta, Utc};
use claims::{assert_none, assert_ok, assert_some, assert_some_eq};
use futures_util::future::join_all;
use job_queue::{
    CleanupPolicy, EnqueueOptions, Job, JobStatus, JobStore, ListJobsQuery, NewJob, StoreError,
};
use serde_json::json;
use std::time::Duration;

pub const LOCK: Duration = Duration::from_secs(60);

pub async fn enqueue<S: JobStore>(store: &S, job_type: &str, options: EnqueueOptions) -> Job {
    let job = NewJob::new(job_type, &json!({ "job": job_type }), options).unwrap();
    store.add_job(job).await.unwrap()
}

pub async fn new_jobs_are_pending<S: JobStore>(store: S) {
    let before = Utc::now() - TimeDelta::seconds(5);
    let job = enqueue(&store, "email", EnqueueOptions::default()).await;

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.queue, "default");
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert_none!(job.run_at);
    assert_none!(job.locked_until);
    assert_none!(&job.last_error);
    assert_none!(job.completed_at);
    assert!(job.created_at >= before);
    assert_eq!(job.payload, r#"{"job":"email"}"#);

    assert_some_eq!(store.get_job(job.id).await.unwrap(), job);
}

pub async fn claims_are_fifo_within_a_queue<S: JobStore>(store: S) {
    let a = enqueue(&store, "a", EnqueueOptions::default()).await;
    let b = enqueue(&store, "b", EnqueueOptions::default()).await;
    let c = enqueue(&store, "c", EnqueueOptions::default()).await;

    let mut claimed = Vec::new();
    while let Some(job) = store.claim_job("default", LOCK).await.unwrap() {
        claimed.push(job.id);
    }
    assert_eq!(claimed, vec![a.id, b.id, c.id]);
}

pub async fn queues_are_isolated<S: JobStore>(store: S) {
    let job = enqueue(&store, "a", EnqueueOptions::default().queue("queue-a")).await;

    assert_none!(store.claim_job("queue-b", LOCK).await.unwrap());

    let claimed = assert_some!(store.claim_job("queue-a", LOCK).await.unwrap());
    assert_eq!(claimed.id, job.id);
}

pub async fn claim_leases_and_counts_attempt<S: JobStore>(store: S) {
    let job = enqueue(&store, "a", EnqueueOptions::default()).await;
    let before = Utc::now() - TimeDelta::seconds(5);

    let claimed = assert_some!(store.claim_job("default", LOCK).await.unwrap());
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert_eq!(claimed.attempts, 1);
    let locked_until = assert_some!(claimed.locked_until);
    assert!(locked_until >= before + TimeDelta::seconds(60));

    // Leased jobs are not eligible
    assert_none!(store.claim_job("default", LOCK).await.unwrap());
}

pub async fn delayed_jobs_wait<S: JobStore>(store: S) {
    let delayed = enqueue(
        &store,
        "later",
        EnqueueOptions::default().delay(Duration::from_secs(3600)),
    )
    .await;
    assert!(assert_some!(delayed.run_at) > Utc::now());

    let now = enqueue(&store, "now", EnqueueOptions::default()).await;

    let claimed = assert_some!(store.claim_job("default", LOCK).await.unwrap());
    assert_eq!(claimed.id, now.id);
    assert_none!(store.claim_job("default", LOCK).await.unwrap());
}

pub async fn concurrent_claims_hand_out_a_job_once<S: JobStore>(store: S) {
    let job = enqueue(&store, "a", EnqueueOptions::default()).await;

    let claims = (0..16).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.claim_job("default", LOCK).await })
    });

    let claimed: Vec<Job> = join_all(claims)
        .await
        .into_iter()
        .filter_map(|result| result.unwrap().unwrap())
        .collect();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, job.id);
    assert_eq!(claimed[0].attempts, 1);
}

pub async fn failures_retry_with_backoff_then_fail<S: JobStore>(store: S) {
    let job = enqueue(&store, "flaky", EnqueueOptions::default().max_attempts(3)).await;

    // Attempt 1
    assert_some!(store.claim_job("default", LOCK).await.unwrap());
    let before = Utc::now();
    assert_eq!(store.fail_job(job.id, "boom 1").await.unwrap(), JobStatus::Pending);
    let after_first = assert_some!(store.get_job(job.id).await.unwrap());
    assert_eq!(after_first.status, JobStatus::Pending);
    assert_eq!(after_first.attempts, 1);
    assert_none!(after_first.locked_until);
    assert_some_eq!(after_first.last_error.as_deref(), "boom 1");
    let first_run_at = assert_some!(after_first.run_at);
    assert!(first_run_at >= before + TimeDelta::milliseconds(1000));

    // Not eligible until the backoff has passed
    assert_none!(store.claim_job("default", LOCK).await.unwrap());

    // Attempt 2
    wait_for_retry(&store, job.id).await;
    assert_some!(store.claim_job("default", LOCK).await.unwrap());
    let before = Utc::now();
    assert_eq!(store.fail_job(job.id, "boom 2").await.unwrap(), JobStatus::Pending);
    let after_second = assert_some!(store.get_job(job.id).await.unwrap());
    assert_eq!(after_second.attempts, 2);
    let second_run_at = assert_some!(after_second.run_at);
    assert!(second_run_at >= before + TimeDelta::milliseconds(2000));

    // Attempt 3 is the last one
    wait_for_retry(&store, job.id).await;
    assert_some!(store.claim_job("default", LOCK).await.unwrap());
    assert_eq!(store.fail_job(job.id, "boom 3").await.unwrap(), JobStatus::Failed);
    let failed = assert_some!(store.get_job(job.id).await.unwrap());
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.max_attempts, 3);
    assert_none!(failed.locked_until);
    assert_some_eq!(failed.last_error.as_deref(), "boom 3");

    assert_none!(store.claim_job("default", LOCK).await.unwrap());
}

/// Sleeps until the retry backoff of job `id` has passed.
async fn wait_for_retry<S: JobStore>(store: &S, id: job_queue::JobId) {
    let job = assert_some!(store.get_job(id).await.unwrap());
    let wait = assert_some!(job.run_at) - Utc::now();
    if let Ok(wait) = wait.to_std() {
        tokio::time::sleep(wait + Duration::from_millis(10)).await;
    }
}

pub async fn fail_unknown_job_is_an_error<S: JobStore>(store: S) {
    let result = store.fail_job(4242, "nope").await;
    assert!(matches!(result, Err(StoreError::JobNotFound(4242))));
}

pub async fn completion_is_idempotent<S: JobStore>(store: S) {
    let job = enqueue(&store, "a", EnqueueOptions::default()).await;
    assert_some!(store.claim_job("default", LOCK).await.unwrap());

    assert_ok!(store.complete_job(job.id).await);
    let completed = assert_some!(store.get_job(job.id).await.unwrap());
    assert_eq!(completed.status, JobStatus::Completed);
    assert_none!(completed.locked_until);
    let completed_at = assert_some!(completed.completed_at);

    assert_ok!(store.complete_job(job.id).await);
    let again = assert_some!(store.get_job(job.id).await.unwrap());
    assert_eq!(again.status, JobStatus::Completed);
    assert_some_eq!(again.completed_at, completed_at);
}

pub async fn expired_leases_are_recovered<S: JobStore>(store: S) {
    let stale = enqueue(&store, "stale", EnqueueOptions::default()).await;
    let fresh = enqueue(&store, "fresh", EnqueueOptions::default()).await;

    assert_some!(store.claim_job("default", Duration::ZERO).await.unwrap());
    assert_some!(store.claim_job("default", LOCK).await.unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.recover_stale_jobs().await.unwrap(), 1);

    let recovered = assert_some!(store.get_job(stale.id).await.unwrap());
    assert_eq!(recovered.status, JobStatus::Pending);
    assert_none!(recovered.locked_until);
    assert_eq!(recovered.attempts, 1);

    let untouched = assert_some!(store.get_job(fresh.id).await.unwrap());
    assert_eq!(untouched.status, JobStatus::Processing);
    assert_some!(untouched.locked_until);

    // Claiming again counts the second attempt exactly once
    let reclaimed = assert_some!(store.claim_job("default", LOCK).await.unwrap());
    assert_eq!(reclaimed.id, stale.id);
    assert_eq!(reclaimed.attempts, 2);

    assert_eq!(store.recover_stale_jobs().await.unwrap(), 0);
}

pub async fn cleanup_respects_retention<S: JobStore>(store: S) {
    let completed = enqueue(&store, "done", EnqueueOptions::default()).await;
    let failed = enqueue(&store, "broken", EnqueueOptions::default().max_attempts(1)).await;
    let pending = enqueue(&store, "waiting", EnqueueOptions::default()).await;

    assert_some!(store.claim_job("default", LOCK).await.unwrap());
    store.complete_job(completed.id).await.unwrap();
    assert_some!(store.claim_job("default", LOCK).await.unwrap());
    store.fail_job(failed.id, "nope").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Nothing is old enough under the default policy
    let report = store.cleanup_jobs(CleanupPolicy::default()).await.unwrap();
    assert_eq!((report.completed, report.failed), (0, 0));

    // Completed retention elapsed, failed retention not
    let report = store
        .cleanup_jobs(CleanupPolicy {
            completed_older_than: Duration::ZERO,
            failed_older_than: Duration::from_secs(3600),
        })
        .await
        .unwrap();
    assert_eq!((report.completed, report.failed), (1, 0));
    assert_none!(store.get_job(completed.id).await.unwrap());
    assert_some!(store.get_job(failed.id).await.unwrap());

    let report = store
        .cleanup_jobs(CleanupPolicy {
            completed_older_than: Duration::ZERO,
            failed_older_than: Duration::ZERO,
        })
        .await
        .unwrap();
    assert_eq!((report.completed, report.failed), (0, 1));
    assert_none!(store.get_job(failed.id).await.unwrap());

    // Non-terminal jobs are never cleaned up
    assert_some!(store.get_job(pending.id).await.unwrap());
}

pub async fn list_and_stats<S: JobStore>(store: S) {
    let a = enqueue(&store, "a", EnqueueOptions::default()).await;
    let b = enqueue(&store, "b", EnqueueOptions::default().queue("other")).await;
    let c = enqueue(&store, "c", EnqueueOptions::default()).await;
    assert_some!(store.claim_job("default", LOCK).await.unwrap());
    store.complete_job(a.id).await.unwrap();

    let all = store.list_jobs(ListJobsQuery::default()).await.unwrap();
    let ids: Vec<_> = all.iter().map(|job| job.id).collect();
    assert_eq!(ids, vec![a.id, b.id, c.id]);

    let default_queue = store
        .list_jobs(ListJobsQuery {
            queue: Some("default".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(default_queue.len(), 2);

    let pending = store
        .list_jobs(ListJobsQuery {
            status: Some(JobStatus::Pending),
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, b.id);

    let stats = store.job_stats(None).await.unwrap();
    insta::assert_compact_json_snapshot!(stats, @r#"{"pending": 2, "processing": 0, "completed": 1, "failed": 0}"#);
    assert_eq!(stats.total(), 3);

    let stats = store.job_stats(Some("other")).await.unwrap();
    insta::assert_compact_json_snapshot!(stats, @r#"{"pending": 1, "processing": 0, "completed": 0, "failed": 0}"#);

    let stats = store.job_stats(Some("nowhere")).await.unwrap();
    assert_eq!(stats.total(), 0);
}
