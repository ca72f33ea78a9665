//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autoblog_engine::core::{
    AdapterError, AdapterRegistry, AgentProfile, ConnectionResult, ContentArtifact, ContentItem,
    GeneratedContent, GenerationError, GenerationRequest, GenerationService, JobStatus, JobStatusView,
    Publisher, PublishResult, PublisherAdapter, RetryPolicy, SourceAdapter,
};
use autoblog_engine::util::{JobId, TenantId};
use autoblog_engine::{Engine, EngineBuilder, EngineConfig};
use serde_json::json;

// ============================================================================
// GENERATION
// ============================================================================

/// Generation service that writes a distinct, well-structured article per call.
pub struct ScriptedGenerator {
    calls: AtomicUsize,
    words: usize,
    tokens: u64,
    delay: Duration,
    repeat: bool,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            words: 400,
            tokens: 1_200,
            delay: Duration::ZERO,
            repeat: false,
        }
    }

    /// Every call takes `delay` before answering.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Every call writes the same article.
    pub fn repeating() -> Self {
        Self {
            repeat: true,
            ..Self::new()
        }
    }

    /// Articles too short to pass the word-count rule.
    pub fn short() -> Self {
        Self {
            words: 20,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub const fn tokens(&self) -> u64 {
        self.tokens
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = if self.repeat { 1 } else { n };
        Ok(article(n, &request.topic.title, self.words, self.tokens))
    }
}

/// Article keyed on `rust` whose filler words are unique to call `n`.
pub fn article(n: usize, topic: &str, words: usize, tokens: u64) -> GeneratedContent {
    let mut body = format!("## Rust overview\nRust and {topic}.\n");
    let headings = ["## Rust in practice", "### Rust details", "## Rust wrap up"];
    let per_section = words / headings.len();
    for (s, heading) in headings.iter().enumerate() {
        body.push_str(heading);
        body.push('\n');
        for i in 0..per_section {
            body.push_str(&format!("c{n}s{s}w{i} "));
            if i % 12 == 11 {
                body.push_str(".\n");
            }
        }
        body.push('\n');
    }
    body.push_str("- rust checklist\n");
    GeneratedContent {
        title: format!("Rust notes {n}: {topic}"),
        body,
        meta_title: format!("Rust notes {n}"),
        meta_description: format!("What rust teams learned about {topic}"),
        keywords: vec!["rust".into()],
        tokens_used: tokens,
        cost_units: 1,
    }
}

// ============================================================================
// ADAPTERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outage {
    None,
    Transient,
    Permanent,
}

/// Publisher that counts calls and fails according to its outage mode.
pub struct RecordingPublisher {
    calls: AtomicUsize,
    outage: Outage,
}

impl RecordingPublisher {
    pub const fn new(outage: Outage) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outage,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublisherAdapter for RecordingPublisher {
    async fn test(&self) -> ConnectionResult {
        ConnectionResult::success("mock cms reachable")
    }

    async fn publish(&self, artifact: &ContentArtifact) -> Result<PublishResult, AdapterError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.outage {
            Outage::None => Ok(PublishResult {
                destination_url: format!("https://blog.example.com/{}", artifact.slug),
                destination_id: Some(n.to_string()),
            }),
            Outage::Transient => Err(AdapterError::Transient("503 service unavailable".into())),
            Outage::Permanent => Err(AdapterError::Permanent("401 unauthorized".into())),
        }
    }
}

/// Source returning a fixed list of items.
pub struct StaticSource {
    pub items: Vec<ContentItem>,
}

#[async_trait]
impl SourceAdapter for StaticSource {
    async fn test(&self) -> ConnectionResult {
        ConnectionResult::success(format!("{} items", self.items.len()))
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<ContentItem>, AdapterError> {
        Ok(self.items.iter().take(limit).cloned().collect())
    }
}

pub fn item(title: &str, url: &str) -> ContentItem {
    ContentItem {
        title: title.into(),
        url: Some(url.into()),
        summary: Some(format!("{title} summary")),
        ..ContentItem::default()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.poll_interval_ms = 10;
    config.pipeline.adapter_timeout_secs = 5;
    config
}

pub fn zero_delay_policy() -> RetryPolicy {
    RetryPolicy::new()
        .with_base_delay(Duration::ZERO)
        .without_jitter()
}

pub struct Harness {
    pub engine: Engine,
    pub generator: Arc<ScriptedGenerator>,
    pub publisher: Arc<RecordingPublisher>,
    pub registry: Arc<AdapterRegistry>,
    pub agent: AgentProfile,
    pub destination: Publisher,
}

impl Harness {
    pub fn tenant(&self) -> TenantId {
        self.agent.tenant
    }
}

/// Started engine with one agent whose default publisher is the mock CMS.
pub fn harness(generator: ScriptedGenerator, outage: Outage) -> Harness {
    harness_with(test_config(), generator, outage, |_| {})
}

pub fn harness_with(
    config: EngineConfig,
    generator: ScriptedGenerator,
    outage: Outage,
    register: impl FnOnce(&AdapterRegistry),
) -> Harness {
    harness_built(config, generator, outage, register, |builder| builder)
}

/// Like [`harness_with`], with a hook to swap builder collaborators
/// (clock, repositories, quota) before the engine is built.
pub fn harness_built(
    config: EngineConfig,
    generator: ScriptedGenerator,
    outage: Outage,
    register: impl FnOnce(&AdapterRegistry),
    customize: impl FnOnce(EngineBuilder) -> EngineBuilder,
) -> Harness {
    let generator = Arc::new(generator);
    let publisher = Arc::new(RecordingPublisher::new(outage));
    let registry = Arc::new(AdapterRegistry::new());
    let shared = Arc::clone(&publisher);
    registry.register_publisher("mockcms", move |_| {
        Ok(Arc::clone(&shared) as Arc<dyn PublisherAdapter>)
    });
    register(&registry);

    let builder = EngineBuilder::new(config)
        .with_generation_service(Arc::clone(&generator) as Arc<dyn GenerationService>)
        .with_registry(Arc::clone(&registry))
        .with_retry_policy(zero_delay_policy())
        .with_scheduler(false);
    let engine = customize(builder).build().expect("engine builds");

    let mut agent = AgentProfile::new(TenantId::new(), "Ferris", "systems programming");
    let destination = Publisher::new(&agent, "mockcms", json!({}));
    agent.default_publisher = Some(destination.id);
    let repos = engine.repositories();
    repos.agents.upsert(agent.clone()).expect("agent stored");
    repos
        .publishers
        .upsert(destination.clone())
        .expect("publisher stored");

    engine.start().expect("engine starts");
    Harness {
        engine,
        generator,
        publisher,
        registry,
        agent,
        destination,
    }
}

/// Poll until the job reaches a terminal state.
pub async fn wait_terminal(engine: &Engine, id: JobId) -> JobStatusView {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let view = engine.status(id).expect("job exists");
        if view.state.is_terminal() {
            return view;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} stuck in {:?}",
            view.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the job is claimed by a worker.
pub async fn wait_running(engine: &Engine, id: JobId) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while engine.status(id).expect("job exists").state != JobStatus::Running {
        assert!(tokio::time::Instant::now() < deadline, "job {id} never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Id of the publish job a generation run enqueued, if any.
pub fn publish_job_of(view: &JobStatusView) -> Option<JobId> {
    let value = view.result.as_ref()?.get("publish_job")?.clone();
    serde_json::from_value(value).ok()
}
