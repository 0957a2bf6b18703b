//! Database schema definitions for SQLx.
//!
//! This module contains the row type and status enum persisted in the `job` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Identifier of a persisted job.
pub type JobId = i64;

/// Lifecycle state of a job.
///
/// `pending -> processing -> {completed | pending (retry) | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed (possibly not before `run_at`)
    Pending,
    /// Claimed by a worker which holds a lease until `locked_until`
    Processing,
    /// Handler finished successfully
    Completed,
    /// All attempts were used up
    Failed,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    /// Returns true if no further transition happens without outside intervention.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The lowercase name used in the database and on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status `{0}` (expected pending, processing, completed or failed)")]
pub struct ParseJobStatusError(String);

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseJobStatusError(s.to_owned()))
    }
}

/// Represents a job record in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Job {
    /// Unique identifier for the job, increasing in creation order
    pub id: JobId,
    /// Logical partition the job lives in
    pub queue: String,
    /// Type identifier for the job (used for dispatch)
    pub job_type: String,
    /// Serialized JSON payload, never interpreted by the store
    pub payload: String,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Number of times the job has been claimed
    pub attempts: i32,
    /// Upper bound on `attempts`, fixed at creation
    pub max_attempts: i32,
    /// The job is not eligible for claiming before this instant
    pub run_at: Option<DateTime<Utc>>,
    /// Lease expiry while `processing`
    pub locked_until: Option<DateTime<Utc>>,
    /// Message of the most recent failure
    pub last_error: Option<String>,
    /// Timestamp when the job was created
    pub created_at: DateTime<Utc>,
    /// Timestamp when the job completed successfully
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether a worker may claim this job at `now`.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_at.is_none_or(|run_at| run_at <= now)
    }

    /// Whether the processing lease of this job has run out at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.locked_until.is_some_and(|locked_until| locked_until <= now)
    }
}
