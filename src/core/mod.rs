//! Domain model, pipeline stages and the job runtime.

pub mod audit;
pub mod dispatch;
pub mod error;
pub mod generation;
pub mod handler;
pub mod job;
pub mod model;
pub mod pipeline;
pub mod quality;
pub mod quota;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod worker_pool;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, JobAction};
pub use dispatch::Dispatcher;
pub use error::{AppResult, EngineError, EngineResult, FailureClass};
pub use generation::{
    GeneratedContent, GenerationError, GenerationRequest, GenerationService, ResearchNotes,
    ResearchService, Topic,
};
pub use handler::{ContentJobHandler, JobContext, JobHandler, JobOutput};
pub use job::{
    queues, GeneratePayload, Job, JobKind, JobStatus, JobStatusView, MaintenancePayload,
    MonitorSourcePayload, NewJob, PublishPayload,
};
pub use model::{
    AgentProfile, ArtifactStatus, ContentArtifact, PostLength, Publisher, QualityScores,
    ScheduleConfig, ScheduleStats, Source,
};
pub use pipeline::{GenerationOutcome, GenerationReport, MonitorReport, Orchestrator};
pub use quota::{Denied, Grant, QuotaGovernor, QuotaLimits, QuotaUsage};
pub use registry::{
    AdapterError, AdapterRegistry, ConnectionResult, ContentItem, PublishResult, PublisherAdapter,
    SourceAdapter,
};
pub use repository::Repositories;
pub use retry::{RetryDecision, RetryError, RetryPolicy};
pub use schedule::ScheduleInterval;
pub use scheduler::{Scheduler, TickReport};
pub use store::{EnqueueOutcome, JobStore, StoreStats};
pub use worker_pool::{PoolError, PoolStats, QueueStats, WorkerPool};
