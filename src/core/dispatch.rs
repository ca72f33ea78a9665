//! Enqueue front door shared by the engine facade, the scheduler and the pipeline.
//!
//! Writes go to the job store first; a wake ticket is then sent to the target
//! queue's workers. Tickets are hints only: workers also poll the store, so a
//! full channel or a job enqueued by another instance is still picked up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::audit::{AuditEvent, AuditSink, InMemoryAuditSink, JobAction};
use crate::core::error::{EngineError, EngineResult};
use crate::core::job::NewJob;
use crate::core::store::{EnqueueOutcome, JobStore};
use crate::util::Clock;

struct Lane {
    tx: Sender<()>,
    rx: Receiver<()>,
}

/// Validates, stores and announces new jobs.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    lanes: HashMap<String, Lane>,
    accepting: AtomicBool,
    audit: Arc<Mutex<InMemoryAuditSink>>,
}

impl Dispatcher {
    /// Dispatcher for the queues named in `config`.
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<Mutex<InMemoryAuditSink>>,
    ) -> Self {
        let lanes = config
            .queues
            .iter()
            .map(|q| {
                let (tx, rx) = bounded(q.max_pending);
                (q.name.clone(), Lane { tx, rx })
            })
            .collect();
        Self {
            store,
            clock,
            lanes,
            accepting: AtomicBool::new(true),
            audit,
        }
    }

    /// Store `job` (deduplicated by idempotency key) and wake its queue.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` while draining, `NotFound` for an unknown queue, or the
    /// store's error.
    pub fn enqueue(&self, job: NewJob) -> EngineResult<EnqueueOutcome> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown("engine is not accepting new jobs".into()));
        }
        self.store_and_wake(job, JobAction::Enqueued)
    }

    /// Enqueue work created by a running job.
    ///
    /// Accepted while draining: the drain waits for it like any other queued
    /// job, so an auto-publish started before the drain still publishes.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown queue, or the store's error.
    pub fn enqueue_follow_up(&self, job: NewJob) -> EngineResult<EnqueueOutcome> {
        self.store_and_wake(job, JobAction::FollowUpEnqueued)
    }

    fn store_and_wake(&self, job: NewJob, action: JobAction) -> EngineResult<EnqueueOutcome> {
        let queue = job.queue().to_string();
        if !self.lanes.contains_key(&queue) {
            return Err(EngineError::NotFound(format!("queue `{queue}`")));
        }
        let now = self.clock.now();
        let job = job.into_job(now);
        let event = AuditEvent::new(&job, action, now);
        let outcome = self.store.enqueue(job)?;
        match outcome {
            EnqueueOutcome::Created(id) => {
                debug!(job_id = %id, queue = %queue, kind = ?event.kind, ?action, "job enqueued");
                self.record(event);
                self.wake(&queue);
            }
            EnqueueOutcome::Existing(existing) => {
                debug!(job_id = %existing, queue = %queue, "duplicate enqueue collapsed onto live job");
            }
        }
        Ok(outcome)
    }

    /// Append to the audit trail.
    pub fn record(&self, event: AuditEvent) {
        self.audit.lock().record(event);
    }

    /// Nudge one idle worker of `queue`.
    pub fn wake(&self, queue: &str) {
        if let Some(lane) = self.lanes.get(queue) {
            match lane.tx.try_send(()) {
                Ok(()) | Err(TrySendError::Disconnected(())) => {}
                Err(TrySendError::Full(())) => {
                    warn!(queue, "wake channel full; workers will pick the job up on their next poll");
                }
            }
        }
    }

    /// Wake receiver for a queue's workers.
    pub fn receiver(&self, queue: &str) -> Option<Receiver<()>> {
        self.lanes.get(queue).map(|l| l.rx.clone())
    }

    /// Configured queue names.
    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lanes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop accepting new jobs.
    pub fn close(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!("dispatcher closed to new jobs");
        }
    }

    /// Whether new jobs are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Underlying job store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Clock used for job timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Shared audit trail.
    pub fn audit(&self) -> &Arc<Mutex<InMemoryAuditSink>> {
        &self.audit
    }
}
