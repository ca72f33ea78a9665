//! Tests for the engine builder

use std::sync::Arc;

use async_trait::async_trait;
use autoblog_engine::core::{
    queues, AdapterRegistry, GeneratedContent, GenerationError, GenerationRequest,
    GenerationService, JobAction, JobKind, JobStatus,
};
use autoblog_engine::{EngineBuilder, EngineConfig, EngineError};
use serde_json::json;

struct NoopGenerator;

#[async_trait]
impl GenerationService for NoopGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedContent, GenerationError> {
        Err(GenerationError::fatal("not used"))
    }
}

fn builder() -> EngineBuilder {
    EngineBuilder::new(EngineConfig::default())
        .with_generation_service(Arc::new(NoopGenerator) as Arc<dyn GenerationService>)
        .with_scheduler(false)
}

#[test]
fn test_build_requires_generation_service() {
    let err = EngineBuilder::new(EngineConfig::default())
        .build()
        .err()
        .expect("missing generator");
    assert!(err.to_string().contains("generation service"));
}

#[test]
fn test_build_rejects_invalid_config() {
    let mut config = EngineConfig::default();
    config.poll_interval_ms = 0;
    let err = EngineBuilder::new(config)
        .with_generation_service(Arc::new(NoopGenerator) as Arc<dyn GenerationService>)
        .build()
        .err()
        .expect("invalid config");
    assert!(err.to_string().contains("invalid engine configuration"));
}

#[test]
fn test_unstarted_engine_reports_health() {
    let engine = builder().build().unwrap();

    let id = engine
        .trigger(JobKind::Generate, json!({ "agent_id": uuid::Uuid::new_v4() }), None)
        .unwrap();

    let health = engine.health();
    assert!(health.accepting);
    assert_eq!(health.active_workers, 0);
    assert_eq!(health.queue_depths[queues::GENERATION], 1);
    assert!(health.last_scheduler_tick.is_none());
    assert_eq!(engine.status(id).unwrap().state, JobStatus::Queued);
    let trail = engine.audit_trail(id);
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, JobAction::Enqueued);
}

#[test]
fn test_trigger_on_unknown_queue_fails() {
    let engine = builder().build().unwrap();
    let err = engine
        .trigger(JobKind::Generate, json!({}), Some("nowhere"))
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[test]
fn test_custom_registry_is_used() {
    let registry = Arc::new(AdapterRegistry::new());
    let engine = builder().with_registry(Arc::clone(&registry)).build().unwrap();
    assert!(Arc::ptr_eq(engine.registry(), &registry));
    assert!(engine.registry().publisher_types().is_empty());
}

#[cfg(feature = "http-adapters")]
#[test]
fn test_default_registry_has_builtins() {
    let engine = builder().build().unwrap();
    assert!(engine.registry().source_types().contains(&"rss".to_string()));
    assert!(engine.registry().publisher_types().contains(&"webhook".to_string()));
}

#[test]
fn test_double_start_is_refused() {
    let engine = builder().build().unwrap();
    engine.start().unwrap();
    assert!(engine.start().is_err());
    engine.shutdown();
    assert!(!engine.health().accepting);
}
