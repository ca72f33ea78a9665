//! Engine facade: the operational surface used by API layers and operators.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::core::audit::{AuditEvent, JobAction};
use crate::core::dispatch::Dispatcher;
use crate::core::error::{EngineError, EngineResult};
use crate::core::job::{Job, JobKind, JobStatus, JobStatusView, NewJob};
use crate::core::pipeline::Orchestrator;
use crate::core::quota::QuotaGovernor;
use crate::core::registry::{AdapterRegistry, ConnectionResult};
use crate::core::repository::Repositories;
use crate::core::scheduler::Scheduler;
use crate::core::store::EnqueueOutcome;
use crate::core::worker_pool::{PoolError, PoolStats, WorkerPool};
use crate::util::{JobId, TenantId};

/// Answer to a health query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Jobs waiting per queue.
    pub queue_depths: BTreeMap<String, usize>,
    /// Jobs currently executing.
    pub active_workers: u64,
    /// Most recent scheduler tick.
    pub last_scheduler_tick: Option<DateTime<Utc>>,
    /// Whether new jobs are accepted.
    pub accepting: bool,
    /// Worker counters.
    pub pool: PoolStats,
}

/// A constructed engine. Build one with
/// [`EngineBuilder`](crate::builders::EngineBuilder).
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) pool: WorkerPool,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) registry: Arc<AdapterRegistry>,
    pub(crate) quota: Arc<QuotaGovernor>,
    pub(crate) repos: Repositories,
    pub(crate) run_scheduler: bool,
    pub(crate) scheduler_stop: CancellationToken,
    pub(crate) scheduler_task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Spawn the worker threads and, unless disabled, the scheduler loop.
    ///
    /// Must be called inside a tokio runtime when the scheduler is enabled.
    ///
    /// # Errors
    ///
    /// Pool start errors, or `InvalidConfig` when no runtime is available for
    /// the scheduler.
    pub fn start(&self) -> Result<(), PoolError> {
        if self.run_scheduler {
            let handle = tokio::runtime::Handle::try_current()
                .map_err(|e| PoolError::InvalidConfig(format!("scheduler needs a tokio runtime: {e}")))?;
            self.pool.start()?;
            let scheduler = Arc::clone(&self.scheduler);
            let stop = self.scheduler_stop.clone();
            *self.scheduler_task.lock() = Some(handle.spawn(scheduler.run(stop)));
        } else {
            self.pool.start()?;
        }
        info!(scheduler = self.run_scheduler, "engine started");
        Ok(())
    }

    /// Enqueue a job of `kind`, optionally on a queue other than its default.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` while draining, `NotFound` for an unknown queue.
    pub fn trigger(&self, kind: JobKind, payload: Value, queue: Option<&str>) -> EngineResult<JobId> {
        let mut job = NewJob::new(kind, payload);
        if let Some(queue) = queue {
            job = job.on_queue(queue);
        }
        Ok(self.dispatcher.enqueue(job)?.id())
    }

    /// Enqueue a fully specified job.
    ///
    /// # Errors
    ///
    /// See [`Engine::trigger`].
    pub fn submit(&self, job: NewJob) -> EngineResult<EnqueueOutcome> {
        self.dispatcher.enqueue(job)
    }

    /// Current state of a job.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn status(&self, id: JobId) -> EngineResult<JobStatusView> {
        self.dispatcher
            .store()
            .get(id)?
            .map(|job| job.view())
            .ok_or_else(|| EngineError::NotFound(format!("job {id}")))
    }

    /// Cancel a job. Waiting jobs are cancelled at once; running jobs stop at
    /// their next checkpoint.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub fn cancel(&self, id: JobId) -> EngineResult<JobStatus> {
        let status = self
            .dispatcher
            .store()
            .request_cancel(id, self.dispatcher.clock().now())?;
        info!(job_id = %id, ?status, "cancel requested");
        Ok(status)
    }

    /// Resolve a source adapter and run its connection test.
    pub async fn test_source(&self, type_tag: &str, config: &Value) -> ConnectionResult {
        match self.registry.resolve_source(type_tag, config) {
            Ok(adapter) => self.bounded_test(adapter.test()).await,
            Err(e) => ConnectionResult::failure(e.to_string()),
        }
    }

    /// Resolve a publisher adapter and run its connection test.
    pub async fn test_publisher(&self, type_tag: &str, config: &Value) -> ConnectionResult {
        match self.registry.resolve_publisher(type_tag, config) {
            Ok(adapter) => self.bounded_test(adapter.test()).await,
            Err(e) => ConnectionResult::failure(e.to_string()),
        }
    }

    async fn bounded_test(&self, test: impl std::future::Future<Output = ConnectionResult>) -> ConnectionResult {
        let limit = self.config.pipeline.adapter_timeout();
        tokio::time::timeout(limit, test).await.unwrap_or_else(|_| {
            ConnectionResult::failure(format!("connection test timed out after {}s", limit.as_secs()))
        })
    }

    /// Queue depths, activity and scheduler heartbeat.
    pub fn health(&self) -> Health {
        let store = self.dispatcher.store();
        let pool = self.pool.stats();
        Health {
            queue_depths: self
                .config
                .queues
                .iter()
                .map(|q| (q.name.clone(), store.depth(&q.name)))
                .collect(),
            active_workers: pool.total_active(),
            last_scheduler_tick: self.scheduler.last_tick(),
            accepting: self.dispatcher.is_accepting(),
            pool,
        }
    }

    /// Unacknowledged dead-lettered jobs, oldest first.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub fn dead_letters(&self, limit: usize) -> EngineResult<Vec<Job>> {
        self.dispatcher.store().dead_letters(limit)
    }

    /// Remove a dead-lettered job from the listing.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidTransition` if the job is not dead-lettered.
    pub fn acknowledge_dead_letter(&self, id: JobId) -> EngineResult<()> {
        self.dispatcher.store().acknowledge(id)?;
        info!(job_id = %id, "dead letter acknowledged");
        Ok(())
    }

    /// Give a dead-lettered job a fresh attempt budget.
    ///
    /// When a live job has since claimed the same idempotency key, that job's
    /// id is returned and the dead letter stays where it is.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidTransition` if the job is not dead-lettered.
    pub fn requeue_dead_letter(&self, id: JobId) -> EngineResult<JobId> {
        let now = self.dispatcher.clock().now();
        let job = self.dispatcher.store().requeue_dead_letter(id, now)?;
        if job.id == id {
            self.dispatcher.record(AuditEvent::new(&job, JobAction::Requeued, now));
            self.dispatcher.wake(&job.queue);
            info!(job_id = %id, queue = %job.queue, "dead letter requeued");
        } else {
            info!(job_id = %id, live = %job.id, "dead letter superseded by a live job");
        }
        Ok(job.id)
    }

    /// Stop the scheduler and new enqueues, then wait for queued and running
    /// work. Returns `false` if `timeout` elapsed first.
    ///
    /// Follow-up jobs created by running work (auto-publish, source fan-out)
    /// are still accepted and waited for.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.stop_scheduler();
        self.pool.drain(timeout).await
    }

    /// Stop everything; running jobs are interrupted and requeued.
    pub fn shutdown(&self) {
        self.stop_scheduler();
        self.pool.shutdown();
        info!("engine shut down");
    }

    fn stop_scheduler(&self) {
        self.scheduler_stop.cancel();
        if let Some(task) = self.scheduler_task.lock().take() {
            if !task.is_finished() {
                task.abort();
            }
        }
    }

    /// Recent audit events of a job.
    pub fn audit_trail(&self, id: JobId) -> Vec<AuditEvent> {
        self.dispatcher.audit().lock().events_for(id)
    }

    /// Recent audit events of a tenant's jobs.
    pub fn tenant_audit_trail(&self, tenant: TenantId) -> Vec<AuditEvent> {
        self.dispatcher.audit().lock().events_for_tenant(tenant)
    }

    /// Beat scheduler, for manual ticks.
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Pipeline orchestrator.
    pub const fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Quota governor.
    pub const fn quota(&self) -> &Arc<QuotaGovernor> {
        &self.quota
    }

    /// Adapter registry.
    pub const fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// Domain repositories.
    pub const fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Configuration in effect.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Worker threads are detached by the pool's own Drop.
        self.scheduler_stop.cancel();
    }
}
