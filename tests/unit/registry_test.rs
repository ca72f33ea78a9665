//! Tests for the adapter registry

use std::sync::Arc;

use async_trait::async_trait;
use autoblog_engine::core::{
    AdapterError, AdapterRegistry, ConnectionResult, ContentArtifact, PublishResult,
    PublisherAdapter,
};
use autoblog_engine::EngineError;
use serde_json::{json, Value};

struct NullPublisher;

#[async_trait]
impl PublisherAdapter for NullPublisher {
    async fn test(&self) -> ConnectionResult {
        ConnectionResult::success("ok")
    }

    async fn publish(&self, artifact: &ContentArtifact) -> Result<PublishResult, AdapterError> {
        Ok(PublishResult {
            destination_url: format!("null://{}", artifact.slug),
            destination_id: None,
        })
    }
}

fn null_factory(config: &Value) -> Result<Arc<dyn PublisherAdapter>, AdapterError> {
    if config.get("reject").is_some() {
        return Err(AdapterError::InvalidConfig("null: reject flag set".into()));
    }
    Ok(Arc::new(NullPublisher))
}

#[test]
fn test_publisher_tags_are_case_insensitive() {
    let registry = AdapterRegistry::new();
    registry.register_publisher("Null", null_factory);

    assert!(registry.resolve_publisher("NULL", &json!({})).is_ok());
    assert!(registry.resolve_publisher(" null ", &json!({})).is_ok());
    assert_eq!(registry.publisher_types(), vec!["null".to_string()]);
}

#[test]
fn test_unknown_tag_is_permanent_error() {
    let registry = AdapterRegistry::new();
    registry.register_publisher("null", null_factory);

    let err = registry
        .resolve_publisher("ghost", &json!({}))
        .err()
        .expect("unknown tag");
    assert!(matches!(err, EngineError::UnknownAdapterType(_)));
    assert!(err.to_string().contains("null"));
    assert!(registry.resolve_source("null", &json!({})).is_err());
}

#[test]
fn test_factory_rejection_surfaces_as_invalid_config() {
    let registry = AdapterRegistry::new();
    registry.register_publisher("null", null_factory);

    let err = registry
        .resolve_publisher("null", &json!({ "reject": true }))
        .err()
        .expect("rejected config");
    assert_eq!(err, EngineError::InvalidAdapterConfig("null: reject flag set".into()));
}

#[test]
fn test_re_registration_replaces_factory() {
    let registry = AdapterRegistry::new();
    registry.register_publisher("null", |_| Err(AdapterError::InvalidConfig("old".into())));
    registry.register_publisher("null", null_factory);

    assert!(registry.resolve_publisher("null", &json!({})).is_ok());
    assert_eq!(registry.publisher_types().len(), 1);
}

#[cfg(feature = "http-adapters")]
mod builtin {
    use autoblog_engine::adapters::register_builtin_adapters;
    use autoblog_engine::core::AdapterRegistry;
    use autoblog_engine::EngineError;
    use serde_json::json;

    fn registry() -> AdapterRegistry {
        let registry = AdapterRegistry::new();
        register_builtin_adapters(&registry);
        registry
    }

    #[test]
    fn test_builtin_tags_registered() {
        let registry = registry();
        assert_eq!(registry.source_types(), vec!["rss".to_string()]);
        assert_eq!(
            registry.publisher_types(),
            vec!["webhook".to_string(), "wordpress".to_string()]
        );
    }

    #[test]
    fn test_rss_requires_http_feed_url() {
        let registry = registry();
        assert!(registry
            .resolve_source("rss", &json!({ "feed_url": "https://example.com/feed.xml" }))
            .is_ok());
        let err = registry
            .resolve_source("rss", &json!({ "feed_url": "ftp://example.com/feed" }))
            .err()
            .expect("invalid feed url");
        assert!(matches!(err, EngineError::InvalidAdapterConfig(_)));
    }

    #[test]
    fn test_webhook_auth_requires_token() {
        let registry = registry();
        let err = registry
            .resolve_publisher(
                "webhook",
                &json!({ "webhook_url": "https://cms.example.com/hook", "auth_type": "bearer" }),
            )
            .err()
            .expect("missing token");
        assert!(matches!(err, EngineError::InvalidAdapterConfig(_)));
        assert!(registry
            .resolve_publisher(
                "webhook",
                &json!({
                    "webhook_url": "https://cms.example.com/hook",
                    "auth_type": "bearer",
                    "auth_token": "secret"
                }),
            )
            .is_ok());
    }

    #[test]
    fn test_wordpress_requires_credentials() {
        let registry = registry();
        let err = registry
            .resolve_publisher("WordPress", &json!({ "site_url": "https://blog.example.com" }))
            .err()
            .expect("missing credentials");
        assert!(matches!(err, EngineError::InvalidAdapterConfig(_)));
        assert!(registry
            .resolve_publisher(
                "wordpress",
                &json!({
                    "site_url": "https://blog.example.com",
                    "username": "editor",
                    "password": "app password"
                }),
            )
            .is_ok());
    }
}
