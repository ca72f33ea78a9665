//! Content pipeline: discover, research, generate, validate, store, publish.
//!
//! Each stage runs inside a job attempt. Quota is reserved before any paid
//! call and settled on every exit path: a successful generation commits the
//! tokens actually used, everything else releases the hold (explicitly, or
//! through the grant's drop when an error unwinds the stage).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::core::dispatch::Dispatcher;
use crate::core::error::{EngineError, EngineResult};
use crate::core::generation::{
    GeneratedContent, GenerationError, GenerationRequest, GenerationService, ResearchNotes,
    ResearchService, Topic,
};
use crate::core::handler::JobContext;
use crate::core::job::{GeneratePayload, JobKind, MonitorSourcePayload, NewJob, PublishPayload};
use crate::core::model::{
    AgentProfile, ArtifactStatus, ContentArtifact, Publisher, QualityScores, ScheduleConfig,
};
use crate::core::quality;
use crate::core::quota::QuotaGovernor;
use crate::core::registry::{AdapterRegistry, ContentItem, PublishResult};
use crate::core::repository::Repositories;
use crate::util::{ArtifactId, Clock, JobId, ResourceKind, SourceId};

/// Reason recorded when discovery finds nothing to write about.
pub const NO_TOPIC_DISCOVERED: &str = "NoTopicDiscovered";

/// Summary of a successful generation, stored as the job result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Stored artifact.
    pub artifact_id: ArtifactId,
    /// Artifact title.
    pub title: String,
    /// Status after generation (`draft` or `scheduled`).
    pub status: ArtifactStatus,
    /// Validation scores.
    pub scores: QualityScores,
    /// Tokens charged to the tenant.
    pub tokens_used: u64,
    /// Follow-up publish job, when auto-publishing.
    pub publish_job: Option<JobId>,
}

/// How a generation attempt ended without an error.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// An artifact was produced.
    Produced(GenerationReport),
    /// Nothing to do; the job is rejected with this reason.
    Rejected(String),
}

/// Result of a source monitoring run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorReport {
    /// Monitored source.
    pub source_id: SourceId,
    /// Items returned by the adapter.
    pub fetched: usize,
    /// Generate jobs created from the items.
    pub enqueued: Vec<JobId>,
    /// The source was inactive and not fetched.
    pub skipped: bool,
}

/// Runs pipeline stages against the collaborators.
pub struct Orchestrator {
    repos: Repositories,
    registry: Arc<AdapterRegistry>,
    quota: Arc<QuotaGovernor>,
    generator: Arc<dyn GenerationService>,
    research: Option<Arc<dyn ResearchService>>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl Orchestrator {
    /// Orchestrator over the given collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repos: Repositories,
        registry: Arc<AdapterRegistry>,
        quota: Arc<QuotaGovernor>,
        generator: Arc<dyn GenerationService>,
        research: Option<Arc<dyn ResearchService>>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            repos,
            registry,
            quota,
            generator,
            research,
            dispatcher,
            clock,
            config,
        }
    }

    /// Current time on the engine clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Pipeline thresholds in effect.
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Generate one artifact for the agent in `payload`.
    ///
    /// # Errors
    ///
    /// `QuotaExceeded` and `ValidationFailed` are rejections; generation and
    /// adapter errors carry their own classification.
    pub async fn run_generation(
        &self,
        payload: &GeneratePayload,
        ctx: &JobContext,
    ) -> EngineResult<GenerationOutcome> {
        let agent = self
            .repos
            .agents
            .get(payload.agent_id)?
            .ok_or_else(|| EngineError::NotFound(format!("agent {}", payload.agent_id)))?;
        if !agent.is_active {
            return Ok(GenerationOutcome::Rejected(format!("agent {} is inactive", agent.id)));
        }
        let schedule = match payload.schedule_id {
            Some(id) => Some(
                self.repos
                    .schedules
                    .get(id)?
                    .ok_or_else(|| EngineError::NotFound(format!("schedule {id}")))?,
            ),
            None => None,
        };

        if let Some(existing) = self.repos.artifacts.find_by_job(ctx.job_id())? {
            return self.resume_generation(existing, schedule.as_ref());
        }

        ctx.checkpoint("discovery")?;
        let Some(topic) = self.discover(&agent, schedule.as_ref(), payload).await? else {
            info!(agent_id = %agent.id, "no topic discovered");
            if let Some(s) = &schedule {
                self.repos.schedules.record_run(s.id, false, false)?;
            }
            return Ok(GenerationOutcome::Rejected(NO_TOPIC_DISCOVERED.into()));
        };

        ctx.checkpoint("research")?;
        let research = self.research(&topic, &agent, ctx).await;

        let auto_publish = payload
            .auto_publish
            .or_else(|| schedule.as_ref().map(|s| s.auto_publish))
            .unwrap_or(false);
        let reserve = if auto_publish {
            self.config.auto_publish_reserve_units
        } else {
            self.config.generation_reserve_units
        };
        ctx.checkpoint("generation")?;
        let grant = self
            .quota
            .reserve(agent.tenant, ResourceKind::GenerationUnits, reserve)?;

        let request = GenerationRequest {
            target_words: agent.post_length.target_words(),
            agent: agent.clone(),
            topic: topic.clone(),
            research,
        };
        let content = self.generate(&request, ctx).await?;

        let now = self.clock.now();
        let mut artifact = new_artifact(&agent, payload, &topic, &content, ctx.job_id(), now);
        if let Some(rule) = self.validate(&content, &mut artifact)? {
            self.quota.release(grant);
            warn!(agent_id = %agent.id, %rule, "generated content rejected");
            artifact.fail(rule.clone(), now);
            self.repos.artifacts.upsert(artifact)?;
            if let Some(s) = &schedule {
                self.repos.schedules.record_run(s.id, true, false)?;
            }
            return Err(EngineError::ValidationFailed(rule));
        }
        if auto_publish {
            artifact.transition(ArtifactStatus::Scheduled, now)?;
        }
        // Stored before the charge so a failed write releases the hold; from
        // here on a retry of this job resumes from the stored artifact.
        self.repos.artifacts.upsert(artifact.clone())?;
        self.quota.commit_partial(grant, content.tokens_used);
        info!(artifact_id = %artifact.id, agent_id = %agent.id, tokens = content.tokens_used, status = ?artifact.status, "artifact generated");
        self.finish_generation(&artifact, schedule.as_ref())
    }

    /// Settle a job whose artifact is already stored, without new charges.
    fn resume_generation(
        &self,
        artifact: ContentArtifact,
        schedule: Option<&ScheduleConfig>,
    ) -> EngineResult<GenerationOutcome> {
        debug!(artifact_id = %artifact.id, status = ?artifact.status, "resuming generation from stored artifact");
        if artifact.status == ArtifactStatus::Failed && artifact.scheduled_at.is_none() {
            if let Some(s) = schedule {
                self.repos.schedules.record_run(s.id, true, false)?;
            }
            let rule = artifact
                .failure_reason
                .unwrap_or_else(|| "validation failed".to_string());
            return Err(EngineError::ValidationFailed(rule));
        }
        self.finish_generation(&artifact, schedule)
    }

    fn finish_generation(
        &self,
        artifact: &ContentArtifact,
        schedule: Option<&ScheduleConfig>,
    ) -> EngineResult<GenerationOutcome> {
        let publish_job = if artifact.status == ArtifactStatus::Scheduled {
            Some(self.enqueue_publish(artifact)?)
        } else {
            None
        };
        if let Some(s) = schedule {
            self.repos.schedules.record_run(s.id, true, true)?;
        }
        Ok(GenerationOutcome::Produced(GenerationReport {
            artifact_id: artifact.id,
            title: artifact.title.clone(),
            status: artifact.status,
            scores: artifact.scores,
            tokens_used: artifact.tokens_used,
            publish_job,
        }))
    }

    /// Enqueue the publish job for a scheduled artifact.
    ///
    /// Goes through the follow-up path, so it succeeds while the engine drains.
    ///
    /// # Errors
    ///
    /// Payload or store errors.
    pub fn enqueue_publish(&self, artifact: &ContentArtifact) -> EngineResult<JobId> {
        let job = NewJob::typed(
            JobKind::Publish,
            &PublishPayload {
                artifact_id: artifact.id,
                publisher_id: None,
            },
        )?
        .with_idempotency_key(artifact.publish_key())
        .with_tenant(artifact.tenant);
        Ok(self.dispatcher.enqueue_follow_up(job)?.id())
    }

    async fn discover(
        &self,
        agent: &AgentProfile,
        schedule: Option<&ScheduleConfig>,
        payload: &GeneratePayload,
    ) -> EngineResult<Option<Topic>> {
        if let Some(title) = payload.topic.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Some(Topic {
                title: title.to_string(),
                summary: payload.source_summary.clone(),
                source_url: payload.source_url.clone(),
                keywords: schedule.map(|s| s.target_keywords.clone()).unwrap_or_default(),
            }));
        }
        let existing: Vec<String> = self
            .repos
            .artifacts
            .titles_for_agent(agent.id)?
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();
        for source in self.repos.sources.list_for_agent(agent.id)? {
            if !source.is_active {
                continue;
            }
            let adapter = match self.registry.resolve_source(&source.type_tag, &source.config) {
                Ok(a) => a,
                Err(e) => {
                    warn!(source_id = %source.id, error = %e, "skipping source during discovery");
                    continue;
                }
            };
            let items = match tokio::time::timeout(
                self.config.adapter_timeout(),
                adapter.fetch(self.config.discovery_fetch_limit),
            )
            .await
            {
                Ok(Ok(items)) => items,
                Ok(Err(e)) => {
                    warn!(source_id = %source.id, error = %e, "source fetch failed during discovery");
                    continue;
                }
                Err(_) => {
                    warn!(source_id = %source.id, "source fetch timed out during discovery");
                    continue;
                }
            };
            let candidate = items.into_iter().find(|item| {
                let text = format!("{} {}", item.title, item.summary.as_deref().unwrap_or(""));
                !item.title.trim().is_empty()
                    && schedule.is_none_or(|s| s.accepts_topic(&text))
                    && !existing.contains(&item.title.to_lowercase())
            });
            if let Some(item) = candidate {
                debug!(source_id = %source.id, title = %item.title, "topic discovered");
                return Ok(Some(topic_from_item(item, schedule)));
            }
        }
        Ok(None)
    }

    async fn research(
        &self,
        topic: &Topic,
        agent: &AgentProfile,
        ctx: &JobContext,
    ) -> Option<ResearchNotes> {
        let service = self.research.as_ref()?;
        let call = async {
            tokio::time::timeout(self.config.adapter_timeout(), service.research(topic, agent))
                .await
                .map_err(|_| EngineError::from(GenerationError::retryable("research timed out")))?
                .map_err(EngineError::from)
        };
        match ctx.guard("research", call).await {
            Ok(notes) => Some(notes),
            Err(e) => {
                warn!(error = %e, "research failed; continuing without notes");
                None
            }
        }
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        ctx: &JobContext,
    ) -> EngineResult<GeneratedContent> {
        let limit = self.config.generation_timeout();
        let call = async {
            match tokio::time::timeout(limit, self.generator.generate(request)).await {
                Ok(result) => result.map_err(EngineError::from),
                Err(_) => Err(EngineError::GenerationService {
                    message: format!("generation timed out after {}s", limit.as_secs()),
                    retryable: true,
                }),
            }
        };
        ctx.guard("generation", call).await
    }

    /// Score `content` into `artifact`; returns the violated rule, if any.
    fn validate(
        &self,
        content: &GeneratedContent,
        artifact: &mut ContentArtifact,
    ) -> EngineResult<Option<String>> {
        let words = quality::word_count(&content.body);
        let score = quality::score(content).total();
        let recent = self
            .repos
            .artifacts
            .list_recent(artifact.tenant, self.config.duplicate_window)?;
        let max_similarity = recent
            .iter()
            .filter(|a| a.id != artifact.id)
            .map(|a| quality::similarity(&a.body, &content.body))
            .fold(0.0_f64, f64::max);
        artifact.scores = QualityScores {
            quality: score,
            max_similarity,
            word_count: words,
        };
        let violation = if score < self.config.quality_threshold {
            Some(format!(
                "quality score {score:.1} below threshold {:.1}",
                self.config.quality_threshold
            ))
        } else if words < self.config.min_word_count {
            Some(format!(
                "word count {words} below minimum {}",
                self.config.min_word_count
            ))
        } else if max_similarity >= self.config.duplicate_threshold {
            Some(format!(
                "similarity {max_similarity:.2} to a recent artifact exceeds {:.2}",
                self.config.duplicate_threshold
            ))
        } else {
            None
        };
        Ok(violation)
    }

    /// Publish one artifact at most once.
    ///
    /// An artifact that already carries a destination URL returns the stored
    /// result without calling the adapter.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidTransition` for failed artifacts, `QuotaExceeded`,
    /// adapter errors.
    pub async fn run_publish(
        &self,
        payload: &PublishPayload,
        ctx: &JobContext,
    ) -> EngineResult<PublishResult> {
        let mut artifact = self
            .repos
            .artifacts
            .get(payload.artifact_id)?
            .ok_or_else(|| EngineError::NotFound(format!("artifact {}", payload.artifact_id)))?;
        if let Some(url) = &artifact.destination_url {
            debug!(artifact_id = %artifact.id, "artifact already published");
            return Ok(PublishResult {
                destination_url: url.clone(),
                destination_id: artifact.destination_id.clone(),
            });
        }
        if artifact.status == ArtifactStatus::Failed {
            return Err(EngineError::InvalidTransition(format!(
                "artifact {} has failed: {}",
                artifact.id,
                artifact.failure_reason.as_deref().unwrap_or("unknown")
            )));
        }
        if artifact.status == ArtifactStatus::Draft {
            artifact.transition(ArtifactStatus::Scheduled, self.clock.now())?;
        }
        let publisher = self.select_publisher(payload, &artifact)?;
        artifact.publisher_id = Some(publisher.id);

        ctx.checkpoint("publish")?;
        let grant = match self.quota.reserve(
            artifact.tenant,
            ResourceKind::PublishActions,
            self.config.publish_reserve_units,
        ) {
            Ok(grant) => grant,
            Err(denied) => {
                let err = EngineError::from(denied);
                artifact.fail(err.to_string(), self.clock.now());
                self.repos.artifacts.upsert(artifact)?;
                return Err(err);
            }
        };
        let adapter = self
            .registry
            .resolve_publisher(&publisher.type_tag, &publisher.config)?;

        let limit = self.config.adapter_timeout();
        let call = async {
            match tokio::time::timeout(limit, adapter.publish(&artifact)).await {
                Ok(result) => result.map_err(EngineError::from),
                Err(_) => Err(EngineError::AdapterTransient(format!(
                    "publish timed out after {}s",
                    limit.as_secs()
                ))),
            }
        };
        match ctx.guard("publish", call).await {
            Ok(result) => {
                self.quota.commit(grant);
                let now = self.clock.now();
                artifact.destination_url = Some(result.destination_url.clone());
                artifact.destination_id.clone_from(&result.destination_id);
                artifact.transition(ArtifactStatus::Published, now)?;
                info!(artifact_id = %artifact.id, url = %result.destination_url, "artifact published");
                self.repos.artifacts.upsert(artifact)?;
                Ok(result)
            }
            Err(e) => {
                self.quota.release(grant);
                self.repos.artifacts.upsert(artifact)?;
                Err(e)
            }
        }
    }

    fn select_publisher(
        &self,
        payload: &PublishPayload,
        artifact: &ContentArtifact,
    ) -> EngineResult<Publisher> {
        let explicit = payload.publisher_id.or(artifact.publisher_id);
        let fallback = match explicit {
            Some(id) => {
                return self
                    .repos
                    .publishers
                    .get(id)?
                    .ok_or_else(|| EngineError::NotFound(format!("publisher {id}")));
            }
            None => self
                .repos
                .agents
                .get(artifact.agent_id)?
                .and_then(|a| a.default_publisher),
        };
        if let Some(id) = fallback {
            if let Some(p) = self.repos.publishers.get(id)? {
                return Ok(p);
            }
        }
        self.repos
            .publishers
            .list_for_agent(artifact.agent_id)?
            .into_iter()
            .find(|p| p.is_active)
            .ok_or_else(|| {
                EngineError::NotFound(format!("no active publisher for agent {}", artifact.agent_id))
            })
    }

    /// Mark an artifact failed after its publish job was dead-lettered.
    ///
    /// # Errors
    ///
    /// Repository errors.
    pub fn fail_artifact(&self, id: ArtifactId, reason: &str) -> EngineResult<()> {
        if let Some(mut artifact) = self.repos.artifacts.get(id)? {
            if artifact.fail(reason, self.clock.now()) {
                self.repos.artifacts.upsert(artifact)?;
            }
        }
        Ok(())
    }

    /// Fetch a source and optionally fan out generate jobs for new items.
    ///
    /// # Errors
    ///
    /// `NotFound`, adapter errors, enqueue errors.
    pub async fn monitor_source(
        &self,
        payload: &MonitorSourcePayload,
        ctx: &JobContext,
    ) -> EngineResult<MonitorReport> {
        let source = self
            .repos
            .sources
            .get(payload.source_id)?
            .ok_or_else(|| EngineError::NotFound(format!("source {}", payload.source_id)))?;
        if !source.is_active {
            return Ok(MonitorReport {
                source_id: source.id,
                fetched: 0,
                enqueued: Vec::new(),
                skipped: true,
            });
        }
        let adapter = self.registry.resolve_source(&source.type_tag, &source.config)?;
        let limit = payload.limit.unwrap_or(self.config.discovery_fetch_limit);
        let timeout = self.config.adapter_timeout();
        let call = async {
            match tokio::time::timeout(timeout, adapter.fetch(limit)).await {
                Ok(result) => result.map_err(EngineError::from),
                Err(_) => Err(EngineError::AdapterTransient(format!(
                    "fetch timed out after {}s",
                    timeout.as_secs()
                ))),
            }
        };
        let items = ctx.guard("fetch", call).await?;
        self.repos.sources.mark_fetched(source.id, self.clock.now())?;

        let mut enqueued = Vec::new();
        if payload.auto_generate || source.auto_generate {
            for item in items.iter().take(self.config.monitor_auto_generate_limit) {
                let marker = item.url.as_deref().unwrap_or(&item.title);
                let job = NewJob::typed(
                    JobKind::Generate,
                    &GeneratePayload {
                        agent_id: source.agent_id,
                        topic: Some(item.title.clone()),
                        source_url: item.url.clone(),
                        source_summary: item.summary.clone(),
                        ..GeneratePayload::default()
                    },
                )?
                .with_idempotency_key(format!("monitor-item:{}:{marker}", source.id))
                .with_tenant(source.tenant);
                let outcome = self.dispatcher.enqueue_follow_up(job)?;
                if outcome.is_created() {
                    enqueued.push(outcome.id());
                }
            }
        }
        info!(source_id = %source.id, fetched = items.len(), enqueued = enqueued.len(), "source monitored");
        Ok(MonitorReport {
            source_id: source.id,
            fetched: items.len(),
            enqueued,
            skipped: false,
        })
    }
}

fn topic_from_item(item: ContentItem, schedule: Option<&ScheduleConfig>) -> Topic {
    Topic {
        title: item.title,
        summary: item.summary.or(item.content),
        source_url: item.url,
        keywords: schedule.map(|s| s.target_keywords.clone()).unwrap_or_default(),
    }
}

fn new_artifact(
    agent: &AgentProfile,
    payload: &GeneratePayload,
    topic: &Topic,
    content: &GeneratedContent,
    job_id: JobId,
    now: DateTime<Utc>,
) -> ContentArtifact {
    let title = if content.title.trim().is_empty() {
        topic.title.clone()
    } else {
        content.title.clone()
    };
    let mut artifact = ContentArtifact::draft(agent, title, content.body.clone(), now);
    artifact.schedule_id = payload.schedule_id;
    artifact.job_id = Some(job_id);
    artifact.meta_title.clone_from(&content.meta_title);
    artifact.meta_description.clone_from(&content.meta_description);
    artifact.keywords.clone_from(&content.keywords);
    artifact.source_urls = topic.source_url.iter().cloned().collect();
    artifact.tokens_used = content.tokens_used;
    artifact.cost_units = content.cost_units;
    artifact
}
