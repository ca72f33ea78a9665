//! Explicit engine construction.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::core::audit::InMemoryAuditSink;
use crate::core::dispatch::Dispatcher;
use crate::core::error::AppResult;
use crate::core::generation::{GenerationService, ResearchService};
use crate::core::handler::{ContentJobHandler, JobHandler};
use crate::core::pipeline::Orchestrator;
use crate::core::quota::{QuotaGovernor, QuotaLimits};
use crate::core::registry::AdapterRegistry;
use crate::core::repository::Repositories;
use crate::core::retry::RetryPolicy;
use crate::core::scheduler::Scheduler;
use crate::core::store::JobStore;
use crate::core::worker_pool::WorkerPool;
use crate::infra::InMemoryJobStore;
use crate::runtime::Engine;
use crate::util::{Clock, SystemClock};

/// Collects collaborators and builds an [`Engine`].
///
/// Only the generation service is mandatory; everything else defaults to the
/// in-memory implementations and the system clock.
pub struct EngineBuilder {
    config: EngineConfig,
    generator: Option<Arc<dyn GenerationService>>,
    research: Option<Arc<dyn ResearchService>>,
    clock: Arc<dyn Clock>,
    repos: Option<Repositories>,
    store: Option<Arc<dyn JobStore>>,
    registry: Option<Arc<AdapterRegistry>>,
    quota: Option<Arc<QuotaGovernor>>,
    handler: Option<Arc<dyn JobHandler>>,
    retry: Option<RetryPolicy>,
    run_scheduler: bool,
    audit_capacity: usize,
}

impl EngineBuilder {
    /// Builder over `config`.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            generator: None,
            research: None,
            clock: Arc::new(SystemClock),
            repos: None,
            store: None,
            registry: None,
            quota: None,
            handler: None,
            retry: None,
            run_scheduler: true,
            audit_capacity: 10_000,
        }
    }

    /// Text generation backend.
    #[must_use]
    pub fn with_generation_service(mut self, service: Arc<dyn GenerationService>) -> Self {
        self.generator = Some(service);
        self
    }

    /// Optional research backend.
    #[must_use]
    pub fn with_research_service(mut self, service: Arc<dyn ResearchService>) -> Self {
        self.research = Some(service);
        self
    }

    /// Time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Domain repositories.
    #[must_use]
    pub fn with_repositories(mut self, repos: Repositories) -> Self {
        self.repos = Some(repos);
        self
    }

    /// Shared job store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Adapter registry. Without one, a registry with the built-in adapters
    /// is created.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<AdapterRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Quota governor.
    #[must_use]
    pub fn with_quota(mut self, quota: Arc<QuotaGovernor>) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Replace the content job handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Retry policy for failed jobs; defaults to the configured one.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Whether `Engine::start` spawns the scheduler loop.
    #[must_use]
    pub const fn with_scheduler(mut self, enabled: bool) -> Self {
        self.run_scheduler = enabled;
        self
    }

    /// Number of audit events kept in memory.
    #[must_use]
    pub const fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity;
        self
    }

    /// Wire the engine. No thread is started until `Engine::start`.
    ///
    /// # Errors
    ///
    /// Invalid configuration or a missing generation service.
    pub fn build(self) -> AppResult<Engine> {
        self.config
            .validate()
            .map_err(|e| anyhow!("invalid engine configuration: {e}"))?;
        let generator = self
            .generator
            .context("a generation service is required to build the engine")?;

        let repos = self.repos.unwrap_or_else(Repositories::in_memory);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()) as Arc<dyn JobStore>);
        let registry = self.registry.unwrap_or_else(default_registry);
        let quota = self
            .quota
            .unwrap_or_else(|| Arc::new(QuotaGovernor::new(QuotaLimits::from(&self.config.quota))));
        let audit = Arc::new(Mutex::new(InMemoryAuditSink::new(self.audit_capacity)));
        let dispatcher = Arc::new(Dispatcher::new(
            &self.config,
            Arc::clone(&store),
            Arc::clone(&self.clock),
            audit,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            repos.clone(),
            Arc::clone(&registry),
            Arc::clone(&quota),
            generator,
            self.research,
            Arc::clone(&dispatcher),
            Arc::clone(&self.clock),
            self.config.pipeline.clone(),
        ));
        let handler = self.handler.unwrap_or_else(|| {
            Arc::new(ContentJobHandler::new(Arc::clone(&orchestrator), Arc::clone(&store)))
                as Arc<dyn JobHandler>
        });
        let policy = self
            .retry
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config.retry));
        let pool = WorkerPool::new(&self.config, Arc::clone(&dispatcher), handler, policy)
            .map_err(|e| anyhow!("worker pool: {e}"))?;
        let scheduler = Arc::new(Scheduler::new(
            repos.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&self.clock),
            self.config.scheduler.clone(),
            self.config.pipeline.cleanup_days_old,
        ));

        Ok(Engine {
            config: self.config,
            dispatcher,
            pool,
            scheduler,
            orchestrator,
            registry,
            quota,
            repos,
            run_scheduler: self.run_scheduler,
            scheduler_stop: CancellationToken::new(),
            scheduler_task: Mutex::new(None),
        })
    }
}

#[cfg(feature = "http-adapters")]
fn default_registry() -> Arc<AdapterRegistry> {
    let registry = AdapterRegistry::new();
    crate::adapters::register_builtin_adapters(&registry);
    Arc::new(registry)
}

#[cfg(not(feature = "http-adapters"))]
fn default_registry() -> Arc<AdapterRegistry> {
    Arc::new(AdapterRegistry::new())
}
