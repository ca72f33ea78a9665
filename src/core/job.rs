//! Job envelope, statuses and typed payloads.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{EngineError, EngineResult};
use crate::util::{AgentId, ArtifactId, JobId, Priority, PublisherId, ScheduleId, SourceId, TenantId};

/// Standard queue names.
pub mod queues {
    /// Content generation runs.
    pub const GENERATION: &str = "generation";
    /// Publish actions against destinations.
    pub const PUBLISHING: &str = "publishing";
    /// Source monitoring.
    pub const SOURCES: &str = "sources";
    /// Cleanup and health checks.
    pub const MAINTENANCE: &str = "maintenance";
    /// Every standard queue.
    pub const ALL: [&str; 4] = [GENERATION, PUBLISHING, SOURCES, MAINTENANCE];
}

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Discover, generate and validate one artifact.
    Generate,
    /// Push one artifact to its destination.
    Publish,
    /// Fetch new items from a source.
    MonitorSource,
    /// Housekeeping.
    Maintenance,
}

impl JobKind {
    /// Queue a job of this kind lands on unless overridden.
    pub const fn default_queue(self) -> &'static str {
        match self {
            Self::Generate => queues::GENERATION,
            Self::Publish => queues::PUBLISHING,
            Self::MonitorSource => queues::SOURCES,
            Self::Maintenance => queues::MAINTENANCE,
        }
    }
}

/// Lifecycle of a job.
///
/// `Failed` means an attempt failed and a retry is pending; terminal states are
/// `Succeeded`, `Rejected`, `Cancelled` and `DeadLettered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by exactly one worker.
    Running,
    /// Last attempt failed; will be claimable again at `available_at`.
    Failed,
    /// Finished successfully.
    Succeeded,
    /// Terminated by a business rule (quota, validation).
    Rejected,
    /// Cancelled by an operator.
    Cancelled,
    /// Retry budget exhausted or permanent failure.
    DeadLettered,
}

impl JobStatus {
    /// No further attempts will be made.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Rejected | Self::Cancelled | Self::DeadLettered
        )
    }

    /// A worker may claim a job in this state.
    pub const fn is_claimable(self) -> bool {
        matches!(self, Self::Queued | Self::Failed)
    }
}

/// One execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// When the attempt was claimed.
    pub started_at: DateTime<Utc>,
    /// When it settled, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason, if it failed.
    pub error: Option<String>,
}

/// A persisted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Identifier.
    pub id: JobId,
    /// What the job does.
    pub kind: JobKind,
    /// Queue it lives on.
    pub queue: String,
    /// Opaque JSON payload.
    pub payload: Value,
    /// Deduplication key; enqueueing the same key twice yields one job.
    pub idempotency_key: Option<String>,
    /// Owning tenant, when known.
    pub tenant: Option<TenantId>,
    /// Claim priority.
    pub priority: Priority,
    /// Current status.
    pub status: JobStatus,
    /// Attempts started so far.
    pub attempts: u32,
    /// Earliest instant the job may be claimed.
    pub available_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Reason of the last failure.
    pub last_error: Option<String>,
    /// Output of the successful attempt.
    pub result: Option<Value>,
    /// Operator asked for cancellation while running.
    pub cancel_requested: bool,
    /// Operator has acknowledged the dead-lettered job.
    pub acknowledged: bool,
    /// Attempt history.
    pub history: Vec<AttemptRecord>,
}

impl Job {
    /// Decode the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Payload` if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> EngineResult<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| EngineError::Payload(format!("{:?} job {}: {e}", self.kind, self.id)))
    }

    /// Snapshot for status queries.
    pub fn view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            kind: self.kind,
            queue: self.queue.clone(),
            state: self.status,
            attempts: self.attempts,
            result: self.result.clone(),
            error: self.last_error.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Builder for a job about to be enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    kind: JobKind,
    payload: Value,
    queue: Option<String>,
    idempotency_key: Option<String>,
    tenant: Option<TenantId>,
    priority: Priority,
    not_before: Option<DateTime<Utc>>,
}

impl NewJob {
    /// Job of `kind` carrying `payload`.
    pub const fn new(kind: JobKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            queue: None,
            idempotency_key: None,
            tenant: None,
            priority: Priority::Normal,
            not_before: None,
        }
    }

    /// Job with a typed payload.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Payload` if the payload cannot be serialized.
    pub fn typed<T: Serialize>(kind: JobKind, payload: &T) -> EngineResult<Self> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Route to a queue other than the kind's default.
    #[must_use]
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Deduplicate on `key`.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Attach the owning tenant.
    #[must_use]
    pub const fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Set the claim priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Do not run before `at`.
    #[must_use]
    pub const fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    /// Queue this job will land on.
    pub fn queue(&self) -> &str {
        self.queue
            .as_deref()
            .unwrap_or_else(|| self.kind.default_queue())
    }

    /// Materialize the job at `now`.
    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        let queue = self.queue().to_string();
        Job {
            id: JobId::new(),
            kind: self.kind,
            queue,
            payload: self.payload,
            idempotency_key: self.idempotency_key,
            tenant: self.tenant,
            priority: self.priority,
            status: JobStatus::Queued,
            attempts: 0,
            available_at: self.not_before.unwrap_or(now),
            created_at: now,
            updated_at: now,
            last_error: None,
            result: None,
            cancel_requested: false,
            acknowledged: false,
            history: Vec::new(),
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    /// Job identifier.
    pub id: JobId,
    /// Job kind.
    pub kind: JobKind,
    /// Queue name.
    pub queue: String,
    /// Current state.
    pub state: JobStatus,
    /// Attempts started.
    pub attempts: u32,
    /// Result on success.
    pub result: Option<Value>,
    /// Reason of the last failure.
    pub error: Option<String>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Payload of a `Generate` job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratePayload {
    /// Agent whose persona drives the run.
    pub agent_id: AgentId,
    /// Schedule that fired this run, if any.
    #[serde(default)]
    pub schedule_id: Option<ScheduleId>,
    /// Caller-supplied topic; skips discovery.
    #[serde(default)]
    pub topic: Option<String>,
    /// Source item URL the topic came from.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Short summary of the source item.
    #[serde(default)]
    pub source_summary: Option<String>,
    /// Overrides the schedule's auto-publish flag.
    #[serde(default)]
    pub auto_publish: Option<bool>,
}

/// Payload of a `Publish` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPayload {
    /// Artifact to publish.
    pub artifact_id: ArtifactId,
    /// Destination override; defaults to the artifact's or agent's publisher.
    #[serde(default)]
    pub publisher_id: Option<PublisherId>,
}

/// Payload of a `MonitorSource` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSourcePayload {
    /// Source to poll.
    pub source_id: SourceId,
    /// Enqueue generation jobs for new items.
    #[serde(default)]
    pub auto_generate: bool,
    /// Maximum items to fetch.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Payload of a `Maintenance` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum MaintenancePayload {
    /// Prune terminal jobs older than `days_old`.
    Cleanup {
        /// Age threshold in days.
        days_old: i64,
    },
    /// Report queue depths.
    HealthCheck,
}
