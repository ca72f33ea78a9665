//! Adapter registry: type tag to source/publisher implementation.
//!
//! Factories are registered at startup. `resolve_*` validates the config bag
//! through the factory and returns a trait object with a fixed capability
//! contract, or `UnknownAdapterType` for an unregistered tag. Tags are
//! case-insensitive.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::core::error::{EngineError, EngineResult};
use crate::core::model::ContentArtifact;

/// One item returned by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Headline.
    pub title: String,
    /// Canonical link.
    pub url: Option<String>,
    /// Short summary.
    pub summary: Option<String>,
    /// Full content, when the source provides it.
    pub content: Option<String>,
    /// Author.
    pub author: Option<String>,
    /// Publication date.
    pub published_at: Option<DateTime<Utc>>,
}

/// Result of a connectivity test.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionResult {
    /// Whether the endpoint is reachable and configured correctly.
    pub ok: bool,
    /// Human-readable detail.
    pub message: String,
    /// A few sample items (sources only).
    pub sample: Vec<ContentItem>,
}

impl ConnectionResult {
    /// Successful test.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            sample: Vec::new(),
        }
    }

    /// Failed test.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            sample: Vec::new(),
        }
    }
}

/// Where an artifact landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    /// Public URL of the published article.
    pub destination_url: String,
    /// Destination-side identifier.
    pub destination_id: Option<String>,
}

/// Adapter failures, pre-classified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// Network error, timeout, 5xx, rate limiting.
    #[error("{0}")]
    Transient(String),
    /// Authentication or malformed request.
    #[error("{0}")]
    Permanent(String),
    /// Config bag rejected by the factory.
    #[error("{0}")]
    InvalidConfig(String),
}

impl From<AdapterError> for EngineError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Transient(m) => Self::AdapterTransient(m),
            AdapterError::Permanent(m) => Self::AdapterPermanent(m),
            AdapterError::InvalidConfig(m) => Self::InvalidAdapterConfig(m),
        }
    }
}

/// Content source capability.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Check connectivity and return a small sample.
    async fn test(&self) -> ConnectionResult;
    /// Fetch at most `limit` items, never more.
    async fn fetch(&self, limit: usize) -> Result<Vec<ContentItem>, AdapterError>;
}

/// Publishing destination capability.
#[async_trait]
pub trait PublisherAdapter: Send + Sync {
    /// Check connectivity and credentials.
    async fn test(&self) -> ConnectionResult;
    /// Push an artifact to the destination.
    async fn publish(&self, artifact: &ContentArtifact) -> Result<PublishResult, AdapterError>;
}

/// Builds a source adapter from its config bag.
pub type SourceFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn SourceAdapter>, AdapterError> + Send + Sync>;

/// Builds a publisher adapter from its config bag.
pub type PublisherFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn PublisherAdapter>, AdapterError> + Send + Sync>;

fn normalize(tag: &str) -> String {
    tag.trim().to_ascii_lowercase()
}

/// Registry of adapter factories.
#[derive(Default)]
pub struct AdapterRegistry {
    sources: RwLock<HashMap<String, SourceFactory>>,
    publishers: RwLock<HashMap<String, PublisherFactory>>,
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a source factory.
    pub fn register_source<F>(&self, tag: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn SourceAdapter>, AdapterError> + Send + Sync + 'static,
    {
        debug!(tag, "source adapter registered");
        self.sources.write().insert(normalize(tag), Arc::new(factory));
    }

    /// Register (or replace) a publisher factory.
    pub fn register_publisher<F>(&self, tag: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn PublisherAdapter>, AdapterError> + Send + Sync + 'static,
    {
        debug!(tag, "publisher adapter registered");
        self.publishers
            .write()
            .insert(normalize(tag), Arc::new(factory));
    }

    /// Instantiate the source adapter for `tag`.
    ///
    /// # Errors
    ///
    /// `UnknownAdapterType` for an unregistered tag, `InvalidAdapterConfig` if
    /// the factory rejects `config`.
    pub fn resolve_source(&self, tag: &str, config: &Value) -> EngineResult<Arc<dyn SourceAdapter>> {
        let factory = self.sources.read().get(&normalize(tag)).cloned();
        let Some(factory) = factory else {
            return Err(EngineError::UnknownAdapterType(format!(
                "source type `{tag}` (available: {})",
                self.source_types().join(", ")
            )));
        };
        factory(config).map_err(EngineError::from)
    }

    /// Instantiate the publisher adapter for `tag`.
    ///
    /// # Errors
    ///
    /// `UnknownAdapterType` for an unregistered tag, `InvalidAdapterConfig` if
    /// the factory rejects `config`.
    pub fn resolve_publisher(
        &self,
        tag: &str,
        config: &Value,
    ) -> EngineResult<Arc<dyn PublisherAdapter>> {
        let factory = self.publishers.read().get(&normalize(tag)).cloned();
        let Some(factory) = factory else {
            return Err(EngineError::UnknownAdapterType(format!(
                "publisher type `{tag}` (available: {})",
                self.publisher_types().join(", ")
            )));
        };
        factory(config).map_err(EngineError::from)
    }

    /// Registered source tags, sorted.
    pub fn source_types(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.sources.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Registered publisher tags, sorted.
    pub fn publisher_types(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.publishers.read().keys().cloned().collect();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(Vec<ContentItem>);

    #[async_trait]
    impl SourceAdapter for Fixed {
        async fn test(&self) -> ConnectionResult {
            ConnectionResult::success("ok")
        }

        async fn fetch(&self, limit: usize) -> Result<Vec<ContentItem>, AdapterError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    #[tokio::test]
    async fn resolves_case_insensitively() {
        let registry = AdapterRegistry::new();
        registry.register_source("Fixed", |_cfg| {
            Ok(Arc::new(Fixed(vec![ContentItem::default(); 5])) as Arc<dyn SourceAdapter>)
        });
        let source = registry.resolve_source("FIXED", &json!({})).unwrap();
        assert_eq!(source.fetch(2).await.unwrap().len(), 2);
    }

    #[test]
    fn unknown_tag_lists_available() {
        let registry = AdapterRegistry::new();
        registry.register_source("rss", |_cfg| {
            Ok(Arc::new(Fixed(Vec::new())) as Arc<dyn SourceAdapter>)
        });
        let Err(err) = registry.resolve_source("twitter", &json!({})) else {
            panic!("expected an error");
        };
        assert_eq!(err.kind_name(), "UnknownAdapterType");
        assert!(err.to_string().contains("rss"));
    }

    #[test]
    fn factory_config_errors_are_permanent() {
        let registry = AdapterRegistry::new();
        registry.register_source("strict", |cfg| {
            if cfg.get("feed_url").is_none() {
                return Err(AdapterError::InvalidConfig("feed_url is required".into()));
            }
            Ok(Arc::new(Fixed(Vec::new())) as Arc<dyn SourceAdapter>)
        });
        let Err(err) = registry.resolve_source("strict", &json!({})) else {
            panic!("expected an error");
        };
        assert_eq!(err.classification(), crate::core::error::FailureClass::Permanent);
    }
}
