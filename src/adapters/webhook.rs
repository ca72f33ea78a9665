//! JSON webhook publisher for custom CMS integrations.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{status_error, transport_error};
use crate::core::model::ContentArtifact;
use crate::core::registry::{AdapterError, ConnectionResult, PublishResult, PublisherAdapter};

/// Authentication header scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// No header.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// `X-API-Key: <token>`.
    ApiKey,
    /// `Authorization: Basic <token>` (token is already encoded).
    Basic,
}

const fn default_timeout() -> u64 {
    30
}

fn default_method() -> String {
    "POST".to_string()
}

/// Config bag of the `webhook` publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint (required).
    pub webhook_url: String,
    /// `POST` or `PUT`.
    #[serde(default = "default_method")]
    pub method: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Authentication scheme.
    #[serde(default)]
    pub auth_type: AuthType,
    /// Token for `auth_type`.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Publishes artifacts by sending them to a webhook.
pub struct WebhookPublisher {
    config: WebhookConfig,
    method: Method,
    client: reqwest::Client,
}

impl WebhookPublisher {
    /// Validate `config` and build the HTTP client.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a missing URL, an unsupported method, or an auth
    /// scheme without a token.
    pub fn from_config(config: &Value) -> Result<Self, AdapterError> {
        let config: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| AdapterError::InvalidConfig(format!("webhook: {e}")))?;
        if config.webhook_url.trim().is_empty() {
            return Err(AdapterError::InvalidConfig("webhook: webhook_url is required".into()));
        }
        let method = match config.method.to_ascii_uppercase().as_str() {
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            other => {
                return Err(AdapterError::InvalidConfig(format!(
                    "webhook: unsupported method `{other}`"
                )))
            }
        };
        if config.auth_type != AuthType::None && config.auth_token.as_deref().is_none_or(str::is_empty) {
            return Err(AdapterError::InvalidConfig(
                "webhook: auth_token is required for the configured auth_type".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .build()
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            config,
            method,
            client,
        })
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(self.method.clone(), &self.config.webhook_url)
            .json(body);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let token = self.config.auth_token.as_deref().unwrap_or_default();
        match self.config.auth_type {
            AuthType::None => request,
            AuthType::Bearer => request.bearer_auth(token),
            AuthType::ApiKey => request.header("X-API-Key", token),
            AuthType::Basic => request.header("Authorization", format!("Basic {token}")),
        }
    }

    async fn send(&self, body: &Value) -> Result<Value, AdapterError> {
        let response = self.request(body).send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error(&e))?;
        if !status.is_success() {
            warn!(url = %self.config.webhook_url, status = status.as_u16(), "webhook rejected request");
            return Err(status_error(status, &text));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

/// Body sent for one artifact.
pub fn publish_body(artifact: &ContentArtifact) -> Value {
    json!({
        "action": "publish",
        "title": artifact.title,
        "content": artifact.body,
        "excerpt": artifact.meta_description,
        "meta_title": artifact.meta_title,
        "meta_description": artifact.meta_description,
        "keywords": artifact.keywords,
        "status": "publish",
        "metadata": {
            "artifact_id": artifact.id,
            "slug": artifact.slug,
            "source_urls": artifact.source_urls,
        },
    })
}

/// Destination reported by a 2xx response; falls back to the webhook URL when
/// the receiver does not return one.
pub fn publish_result(response: &Value, webhook_url: &str) -> PublishResult {
    let text = |key: &str| match response.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    PublishResult {
        destination_url: text("url").unwrap_or_else(|| webhook_url.to_string()),
        destination_id: text("id").or_else(|| text("post_id")),
    }
}

#[async_trait]
impl PublisherAdapter for WebhookPublisher {
    async fn test(&self) -> ConnectionResult {
        let body = json!({
            "action": "test",
            "message": "Connection test from autoblog engine",
        });
        match self.send(&body).await {
            Ok(_) => ConnectionResult::success("Webhook connection successful"),
            Err(e) => ConnectionResult::failure(format!("Webhook returned error: {e}")),
        }
    }

    async fn publish(&self, artifact: &ContentArtifact) -> Result<PublishResult, AdapterError> {
        let response = self.send(&publish_body(artifact)).await?;
        let result = publish_result(&response, &self.config.webhook_url);
        debug!(artifact_id = %artifact.id, url = %result.destination_url, "webhook accepted artifact");
        Ok(result)
    }
}
