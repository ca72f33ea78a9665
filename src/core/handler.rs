//! Job execution seam between the worker pool and the pipeline.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::error::{EngineError, EngineResult};
use crate::core::job::{
    GeneratePayload, Job, JobKind, MaintenancePayload, MonitorSourcePayload, PublishPayload,
};
use crate::core::pipeline::{GenerationOutcome, Orchestrator};
use crate::core::store::JobStore;
use crate::util::JobId;

/// Per-attempt execution context.
///
/// Carries the cancellation token (operator cancel, shutdown) and the soft
/// time limit. Long-running code calls [`JobContext::checkpoint`] between
/// steps and wraps slow calls in [`JobContext::guard`].
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    attempt: u32,
    cancel: CancellationToken,
    soft_deadline: Option<Instant>,
}

impl JobContext {
    /// Context with a fresh token and no soft limit.
    pub fn new(job_id: JobId, attempt: u32) -> Self {
        Self {
            job_id,
            attempt,
            cancel: CancellationToken::new(),
            soft_deadline: None,
        }
    }

    /// Use an externally owned token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Ask the job to stop cooperatively at `deadline`.
    #[must_use]
    pub const fn with_soft_deadline(mut self, deadline: Instant) -> Self {
        self.soft_deadline = Some(deadline);
        self
    }

    /// Job being executed.
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// 1-based attempt number.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Token cancelled on operator request or shutdown.
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail if the job was cancelled or ran past its soft limit.
    ///
    /// # Errors
    ///
    /// `Cancelled` or `TimeLimitExceeded`.
    pub fn checkpoint(&self, stage: &str) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled(format!("stopped before {stage}")));
        }
        if self.soft_deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EngineError::TimeLimitExceeded(format!(
                "soft time limit reached before {stage}"
            )));
        }
        Ok(())
    }

    /// Run `fut`, abandoning it if the job is cancelled meanwhile.
    ///
    /// # Errors
    ///
    /// `Cancelled`, or whatever `fut` returns.
    pub async fn guard<T, F>(&self, stage: &str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(EngineError::Cancelled(format!("cancelled during {stage}"))),
            out = fut => out,
        }
    }
}

/// How a successful attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    /// Finished; the value is stored as the job result.
    Completed(Value),
    /// Terminated by a business rule; not retried.
    Rejected(String),
}

/// Executes jobs claimed by the worker pool.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run one attempt of `job`.
    ///
    /// Errors are classified by the worker pool through
    /// [`EngineError::classification`].
    async fn execute(&self, job: &Job, ctx: &JobContext) -> EngineResult<JobOutput>;

    /// Called once after `job` was dead-lettered with `reason`.
    async fn on_dead_letter(&self, _job: &Job, _reason: &str) {}
}

/// Routes every job kind to the pipeline orchestrator.
pub struct ContentJobHandler {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn JobStore>,
}

impl ContentJobHandler {
    /// Handler backed by `orchestrator`; `store` serves maintenance jobs.
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn JobStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }

    fn maintenance(&self, payload: &MaintenancePayload) -> EngineResult<JobOutput> {
        match payload {
            MaintenancePayload::Cleanup { days_old } => {
                let cutoff = self.orchestrator.now() - chrono::Duration::days(*days_old);
                let removed = self.store.prune_terminal(cutoff)?;
                info!(removed, days_old, "pruned terminal jobs");
                Ok(JobOutput::Completed(json!({ "removed": removed, "days_old": days_old })))
            }
            MaintenancePayload::HealthCheck => {
                let jobs: BTreeMap<String, usize> = self
                    .store
                    .stats()
                    .by_status
                    .into_iter()
                    .map(|(status, count)| (format!("{status:?}"), count))
                    .collect();
                Ok(JobOutput::Completed(json!({
                    "status": "healthy",
                    "jobs": jobs,
                    "checked_at": self.orchestrator.now(),
                })))
            }
        }
    }
}

#[async_trait]
impl JobHandler for ContentJobHandler {
    async fn execute(&self, job: &Job, ctx: &JobContext) -> EngineResult<JobOutput> {
        match job.kind {
            JobKind::Generate => {
                let payload: GeneratePayload = job.decode()?;
                match self.orchestrator.run_generation(&payload, ctx).await? {
                    GenerationOutcome::Produced(report) => {
                        Ok(JobOutput::Completed(serde_json::to_value(report)?))
                    }
                    GenerationOutcome::Rejected(reason) => Ok(JobOutput::Rejected(reason)),
                }
            }
            JobKind::Publish => {
                let payload: PublishPayload = job.decode()?;
                let result = self.orchestrator.run_publish(&payload, ctx).await?;
                Ok(JobOutput::Completed(serde_json::to_value(result)?))
            }
            JobKind::MonitorSource => {
                let payload: MonitorSourcePayload = job.decode()?;
                let report = self.orchestrator.monitor_source(&payload, ctx).await?;
                Ok(JobOutput::Completed(serde_json::to_value(report)?))
            }
            JobKind::Maintenance => {
                let payload: MaintenancePayload = job.decode()?;
                self.maintenance(&payload)
            }
        }
    }

    async fn on_dead_letter(&self, job: &Job, reason: &str) {
        if job.kind != JobKind::Publish {
            return;
        }
        let Ok(payload) = job.decode::<PublishPayload>() else {
            return;
        };
        if let Err(e) = self.orchestrator.fail_artifact(payload.artifact_id, reason) {
            warn!(job_id = %job.id, error = %e, "could not mark artifact failed after dead-letter");
        }
    }
}
