//! Job store abstraction.
//!
//! The store is the only shared state between engine instances. Every method is
//! a single atomic step; in particular `claim_next` moves one claimable job to
//! `Running` and increments its attempt count, so a job is never executed by two
//! workers at once.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::EngineResult;
use crate::core::job::{Job, JobStatus};
use crate::util::JobId;

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job was stored.
    Created(JobId),
    /// A live job with the same idempotency key already exists.
    Existing(JobId),
}

impl EnqueueOutcome {
    /// Identifier of the job that represents this request.
    pub const fn id(self) -> JobId {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }

    /// Whether a new job was created.
    pub const fn is_created(self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Counts per status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of jobs in each status.
    pub by_status: HashMap<JobStatus, usize>,
}

impl StoreStats {
    /// Count for one status.
    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Durable job storage shared by dispatchers, workers and the scheduler.
pub trait JobStore: Send + Sync {
    /// Store a job unless a live job with the same idempotency key exists.
    ///
    /// Jobs that were cancelled or dead-lettered do not block a new job with
    /// the same key.
    fn enqueue(&self, job: Job) -> EngineResult<EnqueueOutcome>;

    /// Atomically claim the highest-priority, oldest claimable job on `queue`
    /// whose `available_at` is not after `now`.
    fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> EngineResult<Option<Job>>;

    /// Mark a running job succeeded.
    fn complete(&self, id: JobId, result: Value, now: DateTime<Utc>) -> EngineResult<()>;

    /// Mark a running job rejected by a business rule.
    fn reject(&self, id: JobId, reason: &str, now: DateTime<Utc>) -> EngineResult<()>;

    /// Record a failed attempt and make the job claimable again at `available_at`.
    fn retry_later(
        &self,
        id: JobId,
        reason: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> EngineResult<()>;

    /// Move a job to the dead-letter set.
    fn dead_letter(&self, id: JobId, reason: &str, now: DateTime<Utc>) -> EngineResult<()>;

    /// Finish a running job as cancelled.
    fn mark_cancelled(&self, id: JobId, reason: &str, now: DateTime<Utc>) -> EngineResult<()>;

    /// Operator cancellation.
    ///
    /// Waiting jobs become `Cancelled` immediately; running jobs are flagged and
    /// stop at their next checkpoint. Returns the status after the request.
    fn request_cancel(&self, id: JobId, now: DateTime<Utc>) -> EngineResult<JobStatus>;

    /// Whether cancellation was requested for a running job.
    fn is_cancel_requested(&self, id: JobId) -> bool;

    /// Fetch a job.
    fn get(&self, id: JobId) -> EngineResult<Option<Job>>;

    /// Unacknowledged dead-lettered jobs, oldest first.
    fn dead_letters(&self, limit: usize) -> EngineResult<Vec<Job>>;

    /// Acknowledge a dead-lettered job; it leaves the dead-letter listing.
    fn acknowledge(&self, id: JobId) -> EngineResult<()>;

    /// Put a dead-lettered job back on its queue with a fresh attempt budget.
    ///
    /// If another live job has since taken the same idempotency key, nothing
    /// is requeued and that job is returned instead.
    fn requeue_dead_letter(&self, id: JobId, now: DateTime<Utc>) -> EngineResult<Job>;

    /// Delete terminal jobs last updated before `older_than`.
    ///
    /// Unacknowledged dead letters are kept.
    fn prune_terminal(&self, older_than: DateTime<Utc>) -> EngineResult<usize>;

    /// Jobs waiting on `queue` (queued or awaiting retry).
    fn depth(&self, queue: &str) -> usize;

    /// Counts by status.
    fn stats(&self) -> StoreStats;
}
