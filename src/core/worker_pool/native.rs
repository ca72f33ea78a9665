//! Native `WorkerPool` using OS threads.
//!
//! Each worker thread owns a single-threaded tokio runtime and serves one
//! queue. Jobs are claimed from the store, never from the wake channel, so a
//! job is executed by at most one worker at a time.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, QueueConfig};
use crate::core::audit::{AuditEvent, JobAction};
use crate::core::dispatch::Dispatcher;
use crate::core::error::EngineError;
use crate::core::handler::{JobContext, JobHandler, JobOutput};
use crate::core::job::Job;
use crate::core::retry::{RetryDecision, RetryPolicy};

use super::{PoolCounters, PoolError, PoolStats};

/// State shared by every worker of the pool.
struct Shared {
    dispatcher: Arc<Dispatcher>,
    handler: Arc<dyn JobHandler>,
    policy: RetryPolicy,
    poll: Duration,
    shutdown: AtomicBool,
    stop: CancellationToken,
}

/// Per-queue worker threads executing jobs from the store.
pub struct WorkerPool {
    queues: Vec<QueueConfig>,
    shared: Arc<Shared>,
    counters: Vec<Arc<PoolCounters>>,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool for the queues in `config`. No threads are spawned until
    /// [`WorkerPool::start`].
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(
        config: &EngineConfig,
        dispatcher: Arc<Dispatcher>,
        handler: Arc<dyn JobHandler>,
        policy: RetryPolicy,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        let counters = config
            .queues
            .iter()
            .map(|_| Arc::new(PoolCounters::default()))
            .collect();
        Ok(Self {
            queues: config.queues.clone(),
            shared: Arc::new(Shared {
                dispatcher,
                handler,
                policy,
                poll: config.poll_interval(),
                shutdown: AtomicBool::new(false),
                stop: CancellationToken::new(),
            }),
            counters,
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawn `concurrency` worker threads for every queue.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted`, `PoolShutdown`, or `SpawnFailed` if the OS refuses a
    /// thread (workers spawned so far keep running until shutdown).
    pub fn start(&self) -> Result<(), PoolError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(PoolError::AlreadyStarted);
        }
        let mut workers = self.workers.lock();
        for (queue, counters) in self.queues.iter().zip(&self.counters) {
            let Some(wake) = self.shared.dispatcher.receiver(&queue.name) else {
                return Err(PoolError::InvalidConfig(format!(
                    "dispatcher has no lane for queue `{}`",
                    queue.name
                )));
            };
            for worker_id in 0..queue.concurrency {
                let handle = spawn_worker(
                    worker_id,
                    queue.clone(),
                    wake.clone(),
                    Arc::clone(&self.shared),
                    Arc::clone(counters),
                )?;
                workers.push(handle);
            }
        }
        info!(
            worker_count = workers.len(),
            queues = self.queues.len(),
            "WorkerPool started with dedicated OS threads"
        );
        Ok(())
    }

    /// Counters per queue.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queues: self
                .queues
                .iter()
                .zip(&self.counters)
                .map(|(q, c)| c.snapshot(&q.name, q.concurrency))
                .collect(),
        }
    }

    /// Jobs currently executing across all queues.
    pub fn active_workers(&self) -> u64 {
        self.stats().total_active()
    }

    /// Stop accepting new jobs and wait until every queue is empty and no job
    /// is running. Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shared.dispatcher.close();
        let store = Arc::clone(self.shared.dispatcher.store());
        let idle = async {
            loop {
                let waiting: usize = self.queues.iter().map(|q| store.depth(&q.name)).sum();
                if waiting == 0 && self.active_workers() == 0 {
                    break;
                }
                tokio::time::sleep(self.shared.poll).await;
            }
        };
        let drained = tokio::time::timeout(timeout, idle).await.is_ok();
        if drained {
            info!("worker pool drained");
        } else {
            warn!(?timeout, "worker pool did not drain before timeout");
        }
        drained
    }

    /// Shut the pool down.
    ///
    /// Running jobs are cancelled and requeued; each worker is then given up to
    /// 2 seconds to exit before it is detached.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down worker pool");
        self.shared.dispatcher.close();
        self.shared.stop.cancel();

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });
            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => debug!(worker_id = idx, "Worker joined successfully"),
                Ok(false) => warn!(worker_id = idx, "Worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "Worker did not exit within timeout - detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }
        info!(worker_count, "Worker pool shut down complete");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers are not joined here; explicit shutdown() does that.
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            self.shared.stop.cancel();
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

fn spawn_worker(
    worker_id: usize,
    queue: QueueConfig,
    wake: Receiver<()>,
    shared: Arc<Shared>,
    counters: Arc<PoolCounters>,
) -> Result<JoinHandle<()>, PoolError> {
    thread::Builder::new()
        .name(format!("wk-{}-{worker_id}", queue.name))
        .spawn(move || {
            debug!(worker_id, queue = %queue.name, "Worker thread started");
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id, queue = %queue.name, error = %e, "Failed to create worker runtime");
                    return;
                }
            };
            let store = Arc::clone(shared.dispatcher.store());
            while !shared.shutdown.load(Ordering::Acquire) {
                let now = shared.dispatcher.clock().now();
                // Counted as active before the claim so drain never sees a
                // claimed job that is neither waiting nor running.
                counters.active.fetch_add(1, Ordering::Relaxed);
                let claimed = store.claim_next(&queue.name, now);
                if !matches!(claimed, Ok(Some(_))) {
                    counters.active.fetch_sub(1, Ordering::Relaxed);
                }
                match claimed {
                    Ok(Some(job)) => {
                        counters.claimed.fetch_add(1, Ordering::Relaxed);
                        rt.block_on(run_job(&shared, &queue, &counters, job));
                        counters.active.fetch_sub(1, Ordering::Relaxed);
                    }
                    Ok(None) => match wake.recv_timeout(shared.poll) {
                        Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    },
                    Err(e) => {
                        warn!(worker_id, queue = %queue.name, error = %e, "claim failed");
                        thread::sleep(shared.poll);
                    }
                }
            }
            debug!(worker_id, queue = %queue.name, "Worker thread exiting");
        })
        .map_err(|e| PoolError::SpawnFailed(e.to_string()))
}

async fn run_job(shared: &Shared, queue: &QueueConfig, counters: &PoolCounters, job: Job) {
    let store = shared.dispatcher.store();
    let token = shared.stop.child_token();
    let mut ctx = JobContext::new(job.id, job.attempts).with_cancellation(token.clone());
    if queue.soft_time_limit_secs > 0 {
        ctx = ctx.with_soft_deadline(tokio::time::Instant::now() + queue.soft_time_limit());
    }
    debug!(job_id = %job.id, queue = %queue.name, attempt = job.attempts, kind = ?job.kind, "executing job");
    audit(shared, &job, JobAction::Started, None);

    let done = CancellationToken::new();
    let hard = queue.hard_time_limit();
    let exec = async {
        let attempt = AssertUnwindSafe(shared.handler.execute(&job, &ctx)).catch_unwind();
        let result = match tokio::time::timeout(hard, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(EngineError::Panic(panic_message(panic.as_ref()))),
            Err(_) => Err(EngineError::TimeLimitExceeded(format!(
                "hard time limit of {}s exceeded",
                hard.as_secs()
            ))),
        };
        done.cancel();
        result
    };
    let watch = async {
        loop {
            tokio::select! {
                () = done.cancelled() => break,
                () = tokio::time::sleep(shared.poll) => {}
            }
            if store.is_cancel_requested(job.id) {
                token.cancel();
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(exec, watch);

    let now = shared.dispatcher.clock().now();
    let settled = match result {
        Ok(JobOutput::Completed(value)) => {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
            audit(shared, &job, JobAction::Completed, None);
            store.complete(job.id, value, now)
        }
        Ok(JobOutput::Rejected(reason)) => {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            info!(job_id = %job.id, %reason, "job rejected");
            audit(shared, &job, JobAction::Rejected, Some(&reason));
            store.reject(job.id, &reason, now)
        }
        Err(e) if store.is_cancel_requested(job.id) => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            info!(job_id = %job.id, "job cancelled");
            audit(shared, &job, JobAction::Cancelled, None);
            store.mark_cancelled(job.id, &e.to_string(), now)
        }
        Err(e) if e.is_rejection() => {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            let reason = e.to_string();
            info!(job_id = %job.id, %reason, "job rejected");
            audit(shared, &job, JobAction::Rejected, Some(&reason));
            store.reject(job.id, &reason, now)
        }
        Err(e @ EngineError::Cancelled(_)) if shared.stop.is_cancelled() => {
            counters.retried.fetch_add(1, Ordering::Relaxed);
            info!(job_id = %job.id, "job interrupted by shutdown; requeued");
            store.retry_later(job.id, &e.to_string(), now, now)
        }
        Err(e) => {
            let reason = e.to_string();
            match shared.policy.decide(job.attempts, e.classification()) {
                RetryDecision::Retry { delay } => {
                    counters.retried.fetch_add(1, Ordering::Relaxed);
                    let at = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|d| now.checked_add_signed(d))
                        .unwrap_or(now);
                    warn!(job_id = %job.id, attempt = job.attempts, ?delay, %reason, "job failed; retry scheduled");
                    audit(shared, &job, JobAction::Retried, Some(&reason));
                    store.retry_later(job.id, &reason, at, now)
                }
                RetryDecision::DeadLetter => {
                    counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    error!(job_id = %job.id, attempt = job.attempts, %reason, "job dead-lettered");
                    audit(shared, &job, JobAction::DeadLettered, Some(&reason));
                    // Hook runs first so the job only reads as dead once its
                    // side effects are recorded.
                    shared.handler.on_dead_letter(&job, &reason).await;
                    store.dead_letter(job.id, &reason, now)
                }
            }
        }
    };
    if let Err(e) = settled {
        error!(job_id = %job.id, error = %e, "failed to record job outcome");
    }
}

fn audit(shared: &Shared, job: &Job, action: JobAction, detail: Option<&str>) {
    let mut event = AuditEvent::new(job, action, shared.dispatcher.clock().now());
    if let Some(detail) = detail {
        event = event.with_detail(detail);
    }
    shared.dispatcher.record(event);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::InMemoryAuditSink;
    use crate::core::job::{JobKind, JobStatus, NewJob};
    use crate::core::store::JobStore;
    use crate::infra::InMemoryJobStore;
    use crate::util::SystemClock;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        async fn execute(
            &self,
            job: &Job,
            _ctx: &JobContext,
        ) -> crate::core::error::EngineResult<JobOutput> {
            Ok(JobOutput::Completed(job.payload.clone()))
        }
    }

    #[tokio::test]
    async fn test_worker_pool_basic() {
        let mut config = EngineConfig::default();
        config.poll_interval_ms = 10;
        let store = Arc::new(InMemoryJobStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            &config,
            store.clone(),
            Arc::new(SystemClock),
            Arc::new(Mutex::new(InMemoryAuditSink::new(100))),
        ));
        let pool =
            WorkerPool::new(&config, dispatcher.clone(), Arc::new(Echo), RetryPolicy::new()).unwrap();
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(PoolError::AlreadyStarted)));

        let id = dispatcher
            .enqueue(NewJob::new(JobKind::Maintenance, json!({"task": "health_check"})))
            .unwrap()
            .id();
        assert!(pool.drain(Duration::from_secs(5)).await);
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(pool.stats().queue("maintenance").unwrap().succeeded, 1);
        pool.shutdown();
    }
}
