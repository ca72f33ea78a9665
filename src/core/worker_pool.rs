//! Worker pool: dedicated OS threads per queue, each driving a
//! single-threaded tokio runtime.
//!
//! Workers claim jobs from the [`JobStore`](crate::core::store::JobStore),
//! run them through a [`JobHandler`](crate::core::handler::JobHandler) under
//! the queue's soft and hard time limits, and settle the outcome: complete,
//! reject, cancel, retry with backoff, or dead-letter. Idle workers block on
//! the dispatcher's wake channel with a poll timeout so delayed retries and
//! jobs enqueued elsewhere are still found.

mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub use native::WorkerPool;

/// Errors raised by pool lifecycle operations.
#[derive(Debug)]
pub enum PoolError {
    /// `start` was called twice.
    AlreadyStarted,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// A worker thread could not be spawned.
    SpawnFailed(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "worker pool already started"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::SpawnFailed(msg) => write!(f, "failed to spawn worker: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Counters for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queue name.
    pub queue: String,
    /// Worker threads serving the queue.
    pub workers: usize,
    /// Jobs currently executing.
    pub active: u64,
    /// Attempts started.
    pub claimed: u64,
    /// Jobs that succeeded.
    pub succeeded: u64,
    /// Jobs rejected by a business rule.
    pub rejected: u64,
    /// Failed attempts that were rescheduled.
    pub retried: u64,
    /// Jobs cancelled while running.
    pub cancelled: u64,
    /// Jobs that exhausted their retries or failed permanently.
    pub dead_lettered: u64,
}

/// Snapshot across all queues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Per-queue counters, in configuration order.
    pub queues: Vec<QueueStats>,
}

impl PoolStats {
    /// Counters for `queue`.
    pub fn queue(&self, queue: &str) -> Option<&QueueStats> {
        self.queues.iter().find(|q| q.queue == queue)
    }

    /// Jobs executing across all queues.
    pub fn total_active(&self) -> u64 {
        self.queues.iter().map(|q| q.active).sum()
    }
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active: AtomicU64,
    pub claimed: AtomicU64,
    pub succeeded: AtomicU64,
    pub rejected: AtomicU64,
    pub retried: AtomicU64,
    pub cancelled: AtomicU64,
    pub dead_lettered: AtomicU64,
}

impl PoolCounters {
    pub fn snapshot(&self, queue: &str, workers: usize) -> QueueStats {
        QueueStats {
            queue: queue.to_string(),
            workers,
            active: self.active.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        assert_eq!(PoolError::PoolShutdown.to_string(), "pool has been shut down");
        assert_eq!(
            PoolError::InvalidConfig("generation: concurrency must be > 0".into()).to_string(),
            "invalid configuration: generation: concurrency must be > 0"
        );
    }

    #[test]
    fn test_pool_counters_snapshot() {
        let counters = PoolCounters::default();
        counters.claimed.fetch_add(10, Ordering::Relaxed);
        counters.succeeded.fetch_add(7, Ordering::Relaxed);
        counters.dead_lettered.fetch_add(1, Ordering::Relaxed);

        let stats = counters.snapshot("publishing", 2);
        assert_eq!(stats.queue, "publishing");
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.claimed, 10);
        assert_eq!(stats.succeeded, 7);
        assert_eq!(stats.dead_lettered, 1);

        let pool = PoolStats { queues: vec![stats] };
        assert!(pool.queue("publishing").is_some());
        assert_eq!(pool.total_active(), 0);
    }
}
