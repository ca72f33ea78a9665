//! In-memory repositories backed by `parking_lot::RwLock` maps.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::core::error::{EngineError, EngineResult};
use crate::core::model::{AgentProfile, ArtifactStatus, ContentArtifact, Publisher, ScheduleConfig, Source};
use crate::core::repository::{
    AgentRepository, ArtifactRepository, PublisherRepository, Repositories, ScheduleRepository,
    SourceRepository,
};
use crate::util::{AgentId, ArtifactId, JobId, PublisherId, ScheduleId, SourceId, TenantId};

/// Schedules in memory.
#[derive(Default)]
pub struct InMemoryScheduleRepository {
    rows: RwLock<HashMap<ScheduleId, ScheduleConfig>>,
}

impl ScheduleRepository for InMemoryScheduleRepository {
    fn get(&self, id: ScheduleId) -> EngineResult<Option<ScheduleConfig>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    fn upsert(&self, schedule: ScheduleConfig) -> EngineResult<()> {
        self.rows.write().insert(schedule.id, schedule);
        Ok(())
    }

    fn list_active(&self) -> EngineResult<Vec<ScheduleConfig>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    fn advance(
        &self,
        id: ScheduleId,
        expected_next: Option<DateTime<Utc>>,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> EngineResult<bool> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("schedule {id}")))?;
        if row.next_run_at != expected_next {
            return Ok(false);
        }
        row.last_run_at = last_run_at;
        row.next_run_at = next_run_at;
        Ok(true)
    }

    fn record_run(&self, id: ScheduleId, generated: bool, succeeded: bool) -> EngineResult<()> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("schedule {id}")))?;
        if generated {
            row.stats.total_generated += 1;
        }
        if succeeded {
            row.stats.successful += 1;
        } else {
            row.stats.failed += 1;
        }
        Ok(())
    }
}

/// Agents in memory.
#[derive(Default)]
pub struct InMemoryAgentRepository {
    rows: RwLock<HashMap<AgentId, AgentProfile>>,
}

impl AgentRepository for InMemoryAgentRepository {
    fn get(&self, id: AgentId) -> EngineResult<Option<AgentProfile>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    fn upsert(&self, agent: AgentProfile) -> EngineResult<()> {
        self.rows.write().insert(agent.id, agent);
        Ok(())
    }
}

/// Sources in memory.
#[derive(Default)]
pub struct InMemorySourceRepository {
    rows: RwLock<HashMap<SourceId, Source>>,
}

impl SourceRepository for InMemorySourceRepository {
    fn get(&self, id: SourceId) -> EngineResult<Option<Source>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    fn upsert(&self, source: Source) -> EngineResult<()> {
        self.rows.write().insert(source.id, source);
        Ok(())
    }

    fn list_for_agent(&self, agent: AgentId) -> EngineResult<Vec<Source>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|s| s.agent_id == agent && s.is_active)
            .cloned()
            .collect())
    }

    fn list_monitored(&self) -> EngineResult<Vec<Source>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|s| s.is_active && s.monitor_interval_secs.is_some())
            .cloned()
            .collect())
    }

    fn mark_fetched(&self, id: SourceId, at: DateTime<Utc>) -> EngineResult<()> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("source {id}")))?;
        row.last_fetched_at = Some(at);
        Ok(())
    }
}

/// Publishers in memory.
#[derive(Default)]
pub struct InMemoryPublisherRepository {
    rows: RwLock<HashMap<PublisherId, Publisher>>,
}

impl PublisherRepository for InMemoryPublisherRepository {
    fn get(&self, id: PublisherId) -> EngineResult<Option<Publisher>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    fn upsert(&self, publisher: Publisher) -> EngineResult<()> {
        self.rows.write().insert(publisher.id, publisher);
        Ok(())
    }

    fn list_for_agent(&self, agent: AgentId) -> EngineResult<Vec<Publisher>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|p| p.agent_id == agent && p.is_active)
            .cloned()
            .collect())
    }
}

/// Artifacts in memory.
#[derive(Default)]
pub struct InMemoryArtifactRepository {
    rows: RwLock<HashMap<ArtifactId, ContentArtifact>>,
}

impl ArtifactRepository for InMemoryArtifactRepository {
    fn get(&self, id: ArtifactId) -> EngineResult<Option<ContentArtifact>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    fn upsert(&self, artifact: ContentArtifact) -> EngineResult<()> {
        self.rows.write().insert(artifact.id, artifact);
        Ok(())
    }

    fn list_recent(&self, tenant: TenantId, limit: usize) -> EngineResult<Vec<ContentArtifact>> {
        let rows = self.rows.read();
        let mut recent: Vec<&ContentArtifact> = rows.values().filter(|a| a.tenant == tenant).collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(recent.into_iter().take(limit).cloned().collect())
    }

    fn titles_for_agent(&self, agent: AgentId) -> EngineResult<Vec<String>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|a| a.agent_id == agent)
            .map(|a| a.title.clone())
            .collect())
    }

    fn due_for_publish(&self, now: DateTime<Utc>) -> EngineResult<Vec<ContentArtifact>> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|a| {
                a.status == ArtifactStatus::Scheduled && a.scheduled_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }

    fn find_by_job(&self, job: JobId) -> EngineResult<Option<ContentArtifact>> {
        Ok(self
            .rows
            .read()
            .values()
            .find(|a| a.job_id == Some(job))
            .cloned())
    }

    fn failed_publications(&self, max_retries: u32, limit: usize) -> EngineResult<Vec<ContentArtifact>> {
        let rows = self.rows.read();
        let mut failed: Vec<&ContentArtifact> = rows
            .values()
            .filter(|a| a.is_publication_failure() && a.publish_retries < max_retries)
            .collect();
        failed.sort_by_key(|a| a.updated_at);
        Ok(failed.into_iter().take(limit).cloned().collect())
    }
}

impl Repositories {
    /// Fresh in-memory repositories.
    pub fn in_memory() -> Self {
        Self {
            schedules: Arc::new(InMemoryScheduleRepository::default()),
            agents: Arc::new(InMemoryAgentRepository::default()),
            sources: Arc::new(InMemorySourceRepository::default()),
            publishers: Arc::new(InMemoryPublisherRepository::default()),
            artifacts: Arc::new(InMemoryArtifactRepository::default()),
        }
    }
}
