//! Tests for configuration validation

use std::time::Duration;

use autoblog_engine::config::{EngineConfig, QueueConfig};
use autoblog_engine::core::queues;

#[test]
fn test_engine_config_defaults_are_valid() {
    let config = EngineConfig::default();
    assert!(config.validate().is_ok());
    for name in queues::ALL {
        assert!(config.queue(name).is_some(), "missing queue {name}");
    }
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.pipeline.min_word_count, 300);
}

#[test]
fn test_partial_json_fills_defaults() {
    let config = EngineConfig::from_json_str(
        r#"{ "poll_interval_ms": 50, "pipeline": { "quality_threshold": 45.0 } }"#,
    )
    .unwrap();
    assert_eq!(config.poll_interval(), Duration::from_millis(50));
    assert!((config.pipeline.quality_threshold - 45.0).abs() < f64::EPSILON);
    assert_eq!(config.pipeline.duplicate_window, 20);
    assert_eq!(config.scheduler.maintenance_hour, 3);
}

#[test]
fn test_missing_standard_queue_is_invalid() {
    let mut config = EngineConfig::default();
    config.queues.retain(|q| q.name != queues::PUBLISHING);
    let err = config.validate().unwrap_err();
    assert!(err.contains("publishing"));
}

#[test]
fn test_duplicate_queue_is_invalid() {
    let mut config = EngineConfig::default();
    config.queues.push(QueueConfig::new(queues::GENERATION, 1));
    assert!(config.validate().is_err());
}

#[test]
fn test_queue_config_invalid_concurrency() {
    let queue = QueueConfig::new("generation", 0);
    assert!(queue.validate().is_err());
}

#[test]
fn test_queue_config_soft_limit_above_hard() {
    let queue = QueueConfig::new("generation", 1)
        .with_time_limits(Duration::from_secs(120), Duration::from_secs(60));
    assert!(queue.validate().is_err());
}

#[test]
fn test_pipeline_thresholds_are_bounded() {
    let mut config = EngineConfig::default();
    config.pipeline.duplicate_threshold = 1.5;
    assert!(config.validate().is_err());

    let mut config = EngineConfig::default();
    config.pipeline.quality_threshold = -1.0;
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_poll_interval_is_invalid() {
    let mut config = EngineConfig::default();
    config.poll_interval_ms = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_json_reports_parse_error() {
    let err = EngineConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}
