//! Built-in HTTP adapters: an RSS/Atom source, a JSON webhook publisher and a
//! WordPress publisher.

use std::sync::Arc;

use reqwest::StatusCode;

use crate::core::registry::{AdapterError, AdapterRegistry, PublisherAdapter, SourceAdapter};

pub mod rss;
pub mod webhook;
pub mod wordpress;

pub use rss::{RssConfig, RssSource};
pub use webhook::{WebhookConfig, WebhookPublisher};
pub use wordpress::{WordPressConfig, WordPressPublisher};

/// Register the `rss` source and the `webhook` and `wordpress` publishers.
pub fn register_builtin_adapters(registry: &AdapterRegistry) {
    registry.register_source("rss", |config| {
        let source = RssSource::from_config(config)?;
        Ok(Arc::new(source) as Arc<dyn SourceAdapter>)
    });
    registry.register_publisher("webhook", |config| {
        let publisher = WebhookPublisher::from_config(config)?;
        Ok(Arc::new(publisher) as Arc<dyn PublisherAdapter>)
    });
    registry.register_publisher("wordpress", |config| {
        let publisher = WordPressPublisher::from_config(config)?;
        Ok(Arc::new(publisher) as Arc<dyn PublisherAdapter>)
    });
}

/// Classify an HTTP status: 5xx and 429 are worth retrying, other failures are not.
pub(crate) fn status_error(status: StatusCode, body: &str) -> AdapterError {
    let snippet: String = body.chars().take(200).collect();
    let message = format!("HTTP {}: {snippet}", status.as_u16());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AdapterError::Transient(message)
    } else {
        AdapterError::Permanent(message)
    }
}

/// Network failures (connect, timeout, reset) are transient.
pub(crate) fn transport_error(err: &reqwest::Error) -> AdapterError {
    if err.is_builder() {
        AdapterError::InvalidConfig(err.to_string())
    } else {
        AdapterError::Transient(err.to_string())
    }
}
