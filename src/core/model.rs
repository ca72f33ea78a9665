//! Domain records handled by the orchestrator and the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{EngineError, EngineResult};
use crate::core::schedule::ScheduleInterval;
use crate::util::{AgentId, ArtifactId, JobId, PublisherId, ScheduleId, SourceId, TenantId};

/// Preferred article length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostLength {
    /// Roughly 500 words.
    Short,
    /// Roughly 1000 words.
    Medium,
    /// Roughly 2000 words.
    #[default]
    Long,
    /// 3000 words and more.
    VeryLong,
}

impl PostLength {
    /// Target word count handed to the generation service.
    pub const fn target_words(self) -> usize {
        match self {
            Self::Short => 500,
            Self::Medium => 1_000,
            Self::Long => 2_000,
            Self::VeryLong => 3_000,
        }
    }
}

/// Persona and style configuration of a content agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Identifier.
    pub id: AgentId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Display name.
    pub name: String,
    /// Subject area the agent writes about.
    pub expertise: String,
    /// Optional persona description.
    pub persona: Option<String>,
    /// Writing tone.
    pub tone: String,
    /// Preferred length.
    pub post_length: PostLength,
    /// Inactive agents are skipped by the scheduler.
    pub is_active: bool,
    /// Destination used when a publish request names none.
    pub default_publisher: Option<PublisherId>,
}

impl AgentProfile {
    /// Active agent with neutral defaults.
    pub fn new(tenant: TenantId, name: impl Into<String>, expertise: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            tenant,
            name: name.into(),
            expertise: expertise.into(),
            persona: None,
            tone: "professional".into(),
            post_length: PostLength::default(),
            is_active: true,
            default_publisher: None,
        }
    }
}

/// Run statistics maintained after each generation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStats {
    /// Runs that reached the generation stage.
    pub total_generated: u64,
    /// Runs that produced a kept artifact.
    pub successful: u64,
    /// Runs that ended rejected or failed.
    pub failed: u64,
}

/// A standing instruction to generate content on a recurring interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Identifier.
    pub id: ScheduleId,
    /// Agent that writes the content.
    pub agent_id: AgentId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Interval class.
    pub interval: ScheduleInterval,
    /// UTC hour (0-23) at which runs are due.
    pub publish_hour: u32,
    /// Deactivation is the deletion surrogate.
    pub is_active: bool,
    /// Last time the scheduler fired this schedule.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next due instant; never earlier than `last_run_at`.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Publish validated artifacts immediately instead of keeping drafts.
    pub auto_publish: bool,
    /// At least one must appear in a discovered topic (when non-empty).
    pub target_keywords: Vec<String>,
    /// None may appear in a discovered topic.
    pub exclude_keywords: Vec<String>,
    /// Run statistics.
    pub stats: ScheduleStats,
}

impl ScheduleConfig {
    /// Active schedule with no run history.
    pub fn new(agent: &AgentProfile, interval: ScheduleInterval, publish_hour: u32) -> Self {
        Self {
            id: ScheduleId::new(),
            agent_id: agent.id,
            tenant: agent.tenant,
            interval,
            publish_hour: publish_hour.min(23),
            is_active: true,
            last_run_at: None,
            next_run_at: None,
            auto_publish: true,
            target_keywords: Vec::new(),
            exclude_keywords: Vec::new(),
            stats: ScheduleStats::default(),
        }
    }

    /// Next run strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval.next_run_after(now, self.publish_hour)
    }

    /// Whether a topic passes the allow and deny lists (case-insensitive).
    pub fn accepts_topic(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        let allowed = self.target_keywords.is_empty()
            || self
                .target_keywords
                .iter()
                .any(|k| haystack.contains(&k.to_lowercase()));
        let excluded = self
            .exclude_keywords
            .iter()
            .any(|k| haystack.contains(&k.to_lowercase()));
        allowed && !excluded
    }
}

/// A content source of some adapter type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Identifier.
    pub id: SourceId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Adapter type tag; immutable after creation.
    pub type_tag: String,
    /// Display name.
    pub name: String,
    /// Opaque adapter configuration.
    pub config: Value,
    /// Inactive sources are neither monitored nor used for discovery.
    pub is_active: bool,
    /// Monitoring interval in seconds; `None` disables monitoring.
    pub monitor_interval_secs: Option<u64>,
    /// Enqueue generation jobs for new items found while monitoring.
    pub auto_generate: bool,
    /// Last successful fetch.
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl Source {
    /// Active, unmonitored source.
    pub fn new(agent: &AgentProfile, type_tag: impl Into<String>, config: Value) -> Self {
        let type_tag = type_tag.into();
        Self {
            id: SourceId::new(),
            agent_id: agent.id,
            tenant: agent.tenant,
            name: type_tag.clone(),
            type_tag,
            config,
            is_active: true,
            monitor_interval_secs: None,
            auto_generate: false,
            last_fetched_at: None,
        }
    }

    /// When monitoring is next due, if monitoring is enabled.
    pub fn monitor_due_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.monitor_interval_secs?).ok()?;
        Some(match self.last_fetched_at {
            Some(last) => last + chrono::Duration::seconds(secs),
            None => DateTime::<Utc>::MIN_UTC,
        })
    }
}

/// A publishing destination of some adapter type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publisher {
    /// Identifier.
    pub id: PublisherId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Adapter type tag; immutable after creation.
    pub type_tag: String,
    /// Display name.
    pub name: String,
    /// Opaque adapter configuration.
    pub config: Value,
    /// Inactive publishers are never called.
    pub is_active: bool,
}

impl Publisher {
    /// Active publisher.
    pub fn new(agent: &AgentProfile, type_tag: impl Into<String>, config: Value) -> Self {
        let type_tag = type_tag.into();
        Self {
            id: PublisherId::new(),
            agent_id: agent.id,
            tenant: agent.tenant,
            name: type_tag.clone(),
            type_tag,
            config,
            is_active: true,
        }
    }
}

/// Artifact status; moves strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Generated and validated, not scheduled.
    Draft,
    /// Waiting for its publish job.
    Scheduled,
    /// Live at the destination.
    Published,
    /// Terminal failure; see `failure_reason`.
    Failed,
}

impl ArtifactStatus {
    /// Whether `self -> next` is a legal move.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Scheduled | Self::Published | Self::Failed)
                | (Self::Scheduled, Self::Published | Self::Failed)
        )
    }

    /// No further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Published | Self::Failed)
    }
}

/// Scores computed during validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    /// Structural quality score, 0-100.
    pub quality: f64,
    /// Highest similarity to a recent artifact of the tenant, 0-1.
    pub max_similarity: f64,
    /// Body length in words.
    pub word_count: usize,
}

/// A generated article and its publication state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentArtifact {
    /// Identifier.
    pub id: ArtifactId,
    /// Owning tenant.
    pub tenant: TenantId,
    /// Author agent.
    pub agent_id: AgentId,
    /// Schedule that produced it, if any.
    pub schedule_id: Option<ScheduleId>,
    /// Generate job that produced it; a retried job resumes from here.
    #[serde(default)]
    pub job_id: Option<JobId>,
    /// Headline.
    pub title: String,
    /// URL slug derived from the title.
    pub slug: String,
    /// Article body (markdown).
    pub body: String,
    /// SEO title.
    pub meta_title: String,
    /// SEO description.
    pub meta_description: String,
    /// Target keywords.
    pub keywords: Vec<String>,
    /// URLs of the material the article was based on.
    pub source_urls: Vec<String>,
    /// Current status.
    pub status: ArtifactStatus,
    /// Validation scores.
    pub scores: QualityScores,
    /// Generation tokens consumed.
    pub tokens_used: u64,
    /// Cost units reported by the generation service.
    pub cost_units: u64,
    /// Destination chosen for publication.
    pub publisher_id: Option<PublisherId>,
    /// Idempotency marker: set once the destination accepted the article.
    pub destination_url: Option<String>,
    /// Destination-side identifier.
    pub destination_id: Option<String>,
    /// When the artifact became due for publication.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When publication succeeded.
    pub published_at: Option<DateTime<Utc>>,
    /// Reason for `Failed`.
    pub failure_reason: Option<String>,
    /// Times a failed publication was reopened for another try.
    #[serde(default)]
    pub publish_retries: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl ContentArtifact {
    /// Fresh draft written by `agent`.
    pub fn draft(
        agent: &AgentProfile,
        title: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        Self {
            id: ArtifactId::new(),
            tenant: agent.tenant,
            agent_id: agent.id,
            schedule_id: None,
            job_id: None,
            slug: slugify(&title),
            title,
            body: body.into(),
            meta_title: String::new(),
            meta_description: String::new(),
            keywords: Vec::new(),
            source_urls: Vec::new(),
            status: ArtifactStatus::Draft,
            scores: QualityScores::default(),
            tokens_used: 0,
            cost_units: 0,
            publisher_id: agent.default_publisher,
            destination_url: None,
            destination_id: None,
            scheduled_at: None,
            published_at: None,
            failure_reason: None,
            publish_retries: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, enforcing forward-only status.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidTransition` for a backwards or terminal move.
    pub fn transition(&mut self, next: ArtifactStatus, now: DateTime<Utc>) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition(format!(
                "artifact {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        match next {
            ArtifactStatus::Scheduled if self.scheduled_at.is_none() => self.scheduled_at = Some(now),
            ArtifactStatus::Published => self.published_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Failed after passing validation, without reaching the destination.
    pub fn is_publication_failure(&self) -> bool {
        self.status == ArtifactStatus::Failed
            && self.scheduled_at.is_some()
            && self.destination_url.is_none()
    }

    /// Give a failed publication another try.
    ///
    /// The only way out of `Failed`; validation failures stay terminal. The
    /// previous reason is kept until the next attempt settles.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless [`Self::is_publication_failure`] holds.
    pub fn reopen_for_publish(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        if !self.is_publication_failure() {
            return Err(EngineError::InvalidTransition(format!(
                "artifact {} is {:?} and cannot be reopened for publishing",
                self.id, self.status
            )));
        }
        self.status = ArtifactStatus::Scheduled;
        self.publish_retries += 1;
        self.scheduled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Idempotency key of the publish job for the current try.
    pub fn publish_key(&self) -> String {
        match self.publish_retries {
            0 => format!("publish:{}", self.id),
            n => format!("publish:{}:retry:{n}", self.id),
        }
    }

    /// Mark failed with a reason, unless already terminal.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ArtifactStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
        true
    }
}

/// Lower-case, hyphen-separated slug of at most 80 characters.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    let trimmed: String = slug.trim_end_matches('-').chars().take(80).collect();
    trimmed.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_status_moves_forward_only() {
        assert!(ArtifactStatus::Draft.can_transition_to(ArtifactStatus::Scheduled));
        assert!(ArtifactStatus::Scheduled.can_transition_to(ArtifactStatus::Published));
        assert!(ArtifactStatus::Scheduled.can_transition_to(ArtifactStatus::Failed));
        assert!(!ArtifactStatus::Published.can_transition_to(ArtifactStatus::Draft));
        assert!(!ArtifactStatus::Failed.can_transition_to(ArtifactStatus::Scheduled));
        assert!(!ArtifactStatus::Scheduled.can_transition_to(ArtifactStatus::Draft));
    }

    #[test]
    fn topic_filters_are_case_insensitive() {
        let agent = AgentProfile::new(TenantId::new(), "a", "rust");
        let mut schedule = ScheduleConfig::new(&agent, ScheduleInterval::Daily, 10);
        schedule.target_keywords = vec!["Rust".into()];
        schedule.exclude_keywords = vec!["crypto".into()];
        assert!(schedule.accepts_topic("Async rust in practice"));
        assert!(!schedule.accepts_topic("Rust and Crypto wallets"));
        assert!(!schedule.accepts_topic("Go generics"));
    }

    #[test]
    fn only_publication_failures_reopen() {
        let now = Utc::now();
        let agent = AgentProfile::new(TenantId::new(), "a", "rust");

        let mut rejected = ContentArtifact::draft(&agent, "Thin post", "too short", now);
        assert!(rejected.fail("word count 2 below minimum 300", now));
        assert!(!rejected.is_publication_failure());
        assert!(rejected.reopen_for_publish(now).is_err());

        let mut outage = ContentArtifact::draft(&agent, "Good post", "body", now);
        outage.transition(ArtifactStatus::Scheduled, now).unwrap();
        assert_eq!(outage.publish_key(), format!("publish:{}", outage.id));
        assert!(outage.fail("AdapterTransientError: 503", now));
        assert!(outage.is_publication_failure());

        let later = now + chrono::Duration::hours(1);
        outage.reopen_for_publish(later).unwrap();
        assert_eq!(outage.status, ArtifactStatus::Scheduled);
        assert_eq!(outage.scheduled_at, Some(later));
        assert_eq!(outage.publish_key(), format!("publish:{}:retry:1", outage.id));
        assert!(outage.reopen_for_publish(later).is_err());
    }

    #[test]
    fn slug_is_clean() {
        assert_eq!(slugify("  Hello, World! Rust 2024 "), "hello-world-rust-2024");
    }
}
