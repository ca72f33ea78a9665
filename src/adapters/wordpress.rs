//! WordPress REST API publisher (`/wp-json/wp/v2/posts`).
//!
//! Authenticates with an application password over HTTP basic auth. Markdown
//! bodies are rendered to HTML before sending; SEO fields are written to both
//! the Yoast and Rank Math meta keys.

use std::time::Duration;

use async_trait::async_trait;
use pulldown_cmark::{html, Options, Parser};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{status_error, transport_error};
use crate::core::model::ContentArtifact;
use crate::core::registry::{AdapterError, ConnectionResult, PublishResult, PublisherAdapter};

const fn default_timeout() -> u64 {
    30
}

fn default_status() -> String {
    "publish".to_string()
}

const fn default_true() -> bool {
    true
}

/// Config bag of the `wordpress` publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordPressConfig {
    /// Site root, e.g. `https://blog.example.com` (required).
    pub site_url: String,
    /// Account name (required).
    pub username: String,
    /// Application password (required).
    pub password: String,
    /// Post author; defaults to the authenticated user.
    #[serde(default)]
    pub author_id: Option<u64>,
    /// `publish`, `draft` or `pending`.
    #[serde(default = "default_status")]
    pub default_status: String,
    /// Category assigned to every post.
    #[serde(default)]
    pub default_category: Option<u64>,
    /// Render markdown bodies to HTML.
    #[serde(default = "default_true")]
    pub convert_markdown: bool,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Publishes artifacts as WordPress posts.
pub struct WordPressPublisher {
    config: WordPressConfig,
    api_url: String,
    client: reqwest::Client,
}

impl WordPressPublisher {
    /// Validate `config` and build the HTTP client.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a missing site URL or credentials, or an unknown
    /// post status.
    pub fn from_config(config: &Value) -> Result<Self, AdapterError> {
        let config: WordPressConfig = serde_json::from_value(config.clone())
            .map_err(|e| AdapterError::InvalidConfig(format!("wordpress: {e}")))?;
        let site = config.site_url.trim().trim_end_matches('/');
        if !(site.starts_with("http://") || site.starts_with("https://")) {
            return Err(AdapterError::InvalidConfig(format!(
                "wordpress: site_url must be an http(s) URL, got `{}`",
                config.site_url
            )));
        }
        if config.username.trim().is_empty() || config.password.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "wordpress: username and password are required".into(),
            ));
        }
        if !matches!(config.default_status.as_str(), "publish" | "draft" | "pending" | "private") {
            return Err(AdapterError::InvalidConfig(format!(
                "wordpress: unsupported default_status `{}`",
                config.default_status
            )));
        }
        let api_url = format!("{site}/wp-json/wp/v2");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .build()
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            config,
            api_url,
            client,
        })
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value, AdapterError> {
        let response = request
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error(&e))?;
        if !status.is_success() {
            warn!(api = %self.api_url, status = status.as_u16(), "wordpress rejected request");
            return Err(status_error(status, &text));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

/// Render markdown to HTML; bodies that already look like HTML pass through.
pub fn render_body(body: &str, convert_markdown: bool) -> String {
    if !convert_markdown || body.trim_start().starts_with('<') {
        return body.to_string();
    }
    let mut out = String::with_capacity(body.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(body, Options::all()));
    out
}

/// Post document sent for one artifact.
pub fn post_body(artifact: &ContentArtifact, config: &WordPressConfig) -> Value {
    let mut post = json!({
        "title": artifact.title,
        "content": render_body(&artifact.body, config.convert_markdown),
        "status": config.default_status,
        "slug": artifact.slug,
    });
    let Some(fields) = post.as_object_mut() else {
        return post;
    };
    if !artifact.meta_description.is_empty() {
        fields.insert("excerpt".into(), json!(artifact.meta_description));
    }
    if let Some(author) = config.author_id {
        fields.insert("author".into(), json!(author));
    }
    if let Some(category) = config.default_category {
        fields.insert("categories".into(), json!([category]));
    }
    let mut meta = Map::new();
    if !artifact.meta_title.is_empty() {
        meta.insert("_yoast_wpseo_title".into(), json!(artifact.meta_title));
        meta.insert("rank_math_title".into(), json!(artifact.meta_title));
    }
    if !artifact.meta_description.is_empty() {
        meta.insert("_yoast_wpseo_metadesc".into(), json!(artifact.meta_description));
        meta.insert("rank_math_description".into(), json!(artifact.meta_description));
    }
    if !meta.is_empty() {
        fields.insert("meta".into(), Value::Object(meta));
    }
    post
}

/// Destination of a created post.
///
/// # Errors
///
/// `Permanent` when the response carries no `link`.
pub fn post_result(response: &Value) -> Result<PublishResult, AdapterError> {
    let link = response
        .get("link")
        .and_then(Value::as_str)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| AdapterError::Permanent("wordpress: response has no post link".into()))?;
    let id = match response.get("id") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    Ok(PublishResult {
        destination_url: link.to_string(),
        destination_id: id,
    })
}

#[async_trait]
impl PublisherAdapter for WordPressPublisher {
    async fn test(&self) -> ConnectionResult {
        let request = self.client.get(format!("{}/users/me", self.api_url));
        match self.call(request).await {
            Ok(user) => {
                let name = user.get("name").and_then(Value::as_str).unwrap_or("user");
                ConnectionResult::success(format!("Successfully connected as {name}"))
            }
            Err(e) => ConnectionResult::failure(format!("Authentication failed: {e}")),
        }
    }

    async fn publish(&self, artifact: &ContentArtifact) -> Result<PublishResult, AdapterError> {
        let request = self
            .client
            .post(format!("{}/posts", self.api_url))
            .json(&post_body(artifact, &self.config));
        let response = self.call(request).await?;
        let result = post_result(&response)?;
        debug!(artifact_id = %artifact.id, url = %result.destination_url, "wordpress post created");
        Ok(result)
    }
}
