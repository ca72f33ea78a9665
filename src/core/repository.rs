//! Persistence collaborator traits for domain records.
//!
//! The engine only needs a handful of queries; relational storage lives
//! outside this crate. In-memory implementations are in `infra::repository`.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::error::EngineResult;
use crate::core::model::{AgentProfile, ContentArtifact, Publisher, ScheduleConfig, Source};
use crate::util::{AgentId, ArtifactId, JobId, PublisherId, ScheduleId, SourceId, TenantId};

/// Schedule storage.
pub trait ScheduleRepository: Send + Sync {
    /// Fetch one schedule.
    fn get(&self, id: ScheduleId) -> EngineResult<Option<ScheduleConfig>>;
    /// Insert or replace.
    fn upsert(&self, schedule: ScheduleConfig) -> EngineResult<()>;
    /// All active schedules.
    fn list_active(&self) -> EngineResult<Vec<ScheduleConfig>>;
    /// Compare-and-set the run timestamps.
    ///
    /// Succeeds only if the stored `next_run_at` still equals `expected_next`;
    /// returns whether the write happened.
    fn advance(
        &self,
        id: ScheduleId,
        expected_next: Option<DateTime<Utc>>,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> EngineResult<bool>;
    /// Bump run statistics.
    fn record_run(&self, id: ScheduleId, generated: bool, succeeded: bool) -> EngineResult<()>;
}

/// Agent storage.
pub trait AgentRepository: Send + Sync {
    /// Fetch one agent.
    fn get(&self, id: AgentId) -> EngineResult<Option<AgentProfile>>;
    /// Insert or replace.
    fn upsert(&self, agent: AgentProfile) -> EngineResult<()>;
}

/// Source storage.
pub trait SourceRepository: Send + Sync {
    /// Fetch one source.
    fn get(&self, id: SourceId) -> EngineResult<Option<Source>>;
    /// Insert or replace.
    fn upsert(&self, source: Source) -> EngineResult<()>;
    /// Active sources of an agent.
    fn list_for_agent(&self, agent: AgentId) -> EngineResult<Vec<Source>>;
    /// All active sources with monitoring enabled.
    fn list_monitored(&self) -> EngineResult<Vec<Source>>;
    /// Record a successful fetch.
    fn mark_fetched(&self, id: SourceId, at: DateTime<Utc>) -> EngineResult<()>;
}

/// Publisher storage.
pub trait PublisherRepository: Send + Sync {
    /// Fetch one publisher.
    fn get(&self, id: PublisherId) -> EngineResult<Option<Publisher>>;
    /// Insert or replace.
    fn upsert(&self, publisher: Publisher) -> EngineResult<()>;
    /// Active publishers of an agent.
    fn list_for_agent(&self, agent: AgentId) -> EngineResult<Vec<Publisher>>;
}

/// Artifact storage.
pub trait ArtifactRepository: Send + Sync {
    /// Fetch one artifact.
    fn get(&self, id: ArtifactId) -> EngineResult<Option<ContentArtifact>>;
    /// Insert or replace.
    fn upsert(&self, artifact: ContentArtifact) -> EngineResult<()>;
    /// Most recent artifacts of a tenant, newest first.
    fn list_recent(&self, tenant: TenantId, limit: usize) -> EngineResult<Vec<ContentArtifact>>;
    /// Titles already used by an agent.
    fn titles_for_agent(&self, agent: AgentId) -> EngineResult<Vec<String>>;
    /// Scheduled artifacts whose `scheduled_at` is not after `now`.
    fn due_for_publish(&self, now: DateTime<Utc>) -> EngineResult<Vec<ContentArtifact>>;
    /// Artifact produced by a generate job.
    fn find_by_job(&self, job: JobId) -> EngineResult<Option<ContentArtifact>>;
    /// Publication failures reopened fewer than `max_retries` times, oldest
    /// failure first.
    fn failed_publications(&self, max_retries: u32, limit: usize) -> EngineResult<Vec<ContentArtifact>>;
}

/// Bundle of repositories handed to the orchestrator and the scheduler.
#[derive(Clone)]
pub struct Repositories {
    /// Schedules.
    pub schedules: Arc<dyn ScheduleRepository>,
    /// Agents.
    pub agents: Arc<dyn AgentRepository>,
    /// Sources.
    pub sources: Arc<dyn SourceRepository>,
    /// Publishers.
    pub publishers: Arc<dyn PublisherRepository>,
    /// Artifacts.
    pub artifacts: Arc<dyn ArtifactRepository>,
}
