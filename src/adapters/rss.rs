//! RSS 2.0 / Atom feed source.
//!
//! The feed is parsed as a stream of XML events and parsing stops as soon as
//! `limit` entries were collected.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{status_error, transport_error};
use crate::core::registry::{AdapterError, ConnectionResult, ContentItem, SourceAdapter};

const fn default_max_items() -> usize {
    10
}

const fn default_true() -> bool {
    true
}

const fn default_max_bytes() -> usize {
    5 * 1024 * 1024
}

/// Config bag of the `rss` source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssConfig {
    /// Feed URL (required).
    pub feed_url: String,
    /// Upper bound on items per fetch.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Keep full entry content.
    #[serde(default = "default_true")]
    pub include_content: bool,
    /// Keep entry summaries.
    #[serde(default = "default_true")]
    pub include_summary: bool,
    /// Largest feed document accepted, in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

/// Feed reader over HTTP.
pub struct RssSource {
    config: RssConfig,
    client: reqwest::Client,
}

impl RssSource {
    /// Validate `config` and build the HTTP client.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when `feed_url` is missing or not http(s).
    pub fn from_config(config: &Value) -> Result<Self, AdapterError> {
        let config: RssConfig = serde_json::from_value(config.clone())
            .map_err(|e| AdapterError::InvalidConfig(format!("rss: {e}")))?;
        if !(config.feed_url.starts_with("http://") || config.feed_url.starts_with("https://")) {
            return Err(AdapterError::InvalidConfig(format!(
                "rss: feed_url must be an http(s) URL, got `{}`",
                config.feed_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;
        Ok(Self { config, client })
    }

    async fn download(&self) -> Result<String, AdapterError> {
        let mut response = self
            .client
            .get(&self.config.feed_url)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let max = self.config.max_bytes;
        check_declared_length(response.content_length(), max)?;
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| transport_error(&e))? {
            append_capped(&mut body, &chunk, max)?;
        }
        let body = String::from_utf8_lossy(&body).into_owned();
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(body)
    }
}

fn too_large(max: usize) -> AdapterError {
    AdapterError::Permanent(format!("feed exceeds {max} bytes"))
}

/// Refuse a response whose declared length is over `max`.
fn check_declared_length(declared: Option<u64>, max: usize) -> Result<(), AdapterError> {
    let limit = u64::try_from(max).unwrap_or(u64::MAX);
    match declared {
        Some(len) if len > limit => Err(too_large(max)),
        _ => Ok(()),
    }
}

/// Append `chunk`, failing once the body would grow past `max`.
fn append_capped(body: &mut Vec<u8>, chunk: &[u8], max: usize) -> Result<(), AdapterError> {
    if body.len().saturating_add(chunk.len()) > max {
        return Err(too_large(max));
    }
    body.extend_from_slice(chunk);
    Ok(())
}

#[async_trait]
impl SourceAdapter for RssSource {
    async fn test(&self) -> ConnectionResult {
        match self.fetch(3).await {
            Ok(sample) => ConnectionResult {
                ok: true,
                message: format!("feed reachable, {} entries sampled", sample.len()),
                sample,
            },
            Err(e) => ConnectionResult::failure(e.to_string()),
        }
    }

    async fn fetch(&self, limit: usize) -> Result<Vec<ContentItem>, AdapterError> {
        let limit = limit.min(self.config.max_items);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let body = self.download().await?;
        let items = parse_feed(&body, limit, self.config.include_content, self.config.include_summary)?;
        debug!(feed = %self.config.feed_url, count = items.len(), "feed parsed");
        Ok(items)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Summary,
    Content,
    Author,
    Published,
}

fn field_for(tag: &[u8]) -> Option<Field> {
    match tag {
        b"title" => Some(Field::Title),
        b"link" | b"guid" => Some(Field::Link),
        b"description" | b"summary" => Some(Field::Summary),
        b"content" | b"encoded" => Some(Field::Content),
        b"author" | b"creator" => Some(Field::Author),
        b"pubDate" | b"published" | b"updated" | b"date" => Some(Field::Published),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[derive(Default)]
struct Draft {
    title: String,
    link: Option<String>,
    summary: String,
    content: String,
    author: String,
    published: String,
}

impl Draft {
    fn push(&mut self, field: Field, text: &str) {
        match field {
            Field::Title => self.title.push_str(text),
            Field::Link => {
                if self.link.is_none() {
                    self.link = Some(text.to_string());
                }
            }
            Field::Summary => self.summary.push_str(text),
            Field::Content => self.content.push_str(text),
            Field::Author => self.author.push_str(text),
            Field::Published => {
                if self.published.is_empty() {
                    self.published.push_str(text);
                }
            }
        }
    }

    fn finish(self, include_content: bool, include_summary: bool) -> ContentItem {
        let non_empty = |s: String| {
            let s = s.trim().to_string();
            (!s.is_empty()).then_some(s)
        };
        ContentItem {
            title: non_empty(self.title).unwrap_or_else(|| "Untitled".to_string()),
            url: self.link.and_then(non_empty),
            summary: if include_summary { non_empty(self.summary) } else { None },
            content: if include_content { non_empty(self.content) } else { None },
            author: non_empty(self.author),
            published_at: parse_date(self.published.trim()),
        }
    }
}

/// Parse up to `limit` entries of an RSS 2.0 or Atom document.
///
/// # Errors
///
/// `Permanent` for malformed XML.
pub fn parse_feed(
    xml: &str,
    limit: usize,
    include_content: bool,
    include_summary: bool,
) -> Result<Vec<ContentItem>, AdapterError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut current: Option<Draft> = None;
    let mut field: Option<Field> = None;
    while items.len() < limit {
        let event = reader
            .read_event()
            .map_err(|e| AdapterError::Permanent(format!("malformed feed: {e}")))?;
        match event {
            Event::Start(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"item" | b"entry" => {
                        current = Some(Draft::default());
                        field = None;
                    }
                    // Atom <author><name>..</name></author>
                    b"name" if field == Some(Field::Author) => {}
                    tag if current.is_some() => field = field_for(tag),
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if let Some(draft) = current.as_mut() {
                    if e.local_name().as_ref() == b"link" && draft.link.is_none() {
                        if let Ok(Some(href)) = e.try_get_attribute("href") {
                            if let Ok(value) = href.unescape_value() {
                                draft.link = Some(value.into_owned());
                            }
                        }
                    }
                }
            }
            Event::Text(t) => {
                if let (Some(draft), Some(f)) = (current.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|e| AdapterError::Permanent(format!("malformed feed: {e}")))?;
                    draft.push(f, &text);
                }
            }
            Event::CData(c) => {
                if let (Some(draft), Some(f)) = (current.as_mut(), field) {
                    let raw = c.into_inner();
                    draft.push(f, &String::from_utf8_lossy(&raw));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"item" | b"entry" => {
                    if let Some(draft) = current.take() {
                        items.push(draft.finish(include_content, include_summary));
                    }
                    field = None;
                }
                b"name" if field == Some(Field::Author) => {}
                _ => field = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Feed</title>
    <item>
      <title>First &amp; foremost</title>
      <link>https://example.com/1</link>
      <description>Short one</description>
      <content:encoded><![CDATA[<p>Body one</p>]]></content:encoded>
      <pubDate>Tue, 10 Jun 2025 04:00:00 GMT</pubDate>
    </item>
    <item><title>Second</title><link>https://example.com/2</link></item>
    <item><title>Third</title><link>https://example.com/3</link></item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <entry>
    <title>Atom entry</title>
    <link href="https://example.com/a" rel="alternate"/>
    <summary>Atom summary</summary>
    <author><name>Ada</name></author>
    <updated>2025-06-10T04:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let items = parse_feed(RSS, 10, true, true).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "First & foremost");
        assert_eq!(items[0].url.as_deref(), Some("https://example.com/1"));
        assert_eq!(items[0].summary.as_deref(), Some("Short one"));
        assert_eq!(items[0].content.as_deref(), Some("<p>Body one</p>"));
        assert!(items[0].published_at.is_some());
    }

    #[test]
    fn stops_after_limit() {
        let items = parse_feed(RSS, 2, true, true).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].title, "Second");
    }

    #[test]
    fn parses_atom_entries() {
        let items = parse_feed(ATOM, 5, false, true).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url.as_deref(), Some("https://example.com/a"));
        assert_eq!(items[0].author.as_deref(), Some("Ada"));
        assert!(items[0].content.is_none());
        assert!(items[0].published_at.is_some());
    }

    #[test]
    fn oversized_feeds_are_refused() {
        assert!(check_declared_length(None, 10).is_ok());
        assert!(check_declared_length(Some(10), 10).is_ok());
        assert!(matches!(
            check_declared_length(Some(11), 10),
            Err(AdapterError::Permanent(_))
        ));

        let mut body = Vec::new();
        append_capped(&mut body, b"<rss>", 10).unwrap();
        append_capped(&mut body, b"</rss", 10).unwrap();
        assert!(matches!(
            append_capped(&mut body, b">", 10),
            Err(AdapterError::Permanent(_))
        ));
        assert_eq!(body, b"<rss></rss");
    }

    #[test]
    fn feed_url_is_required() {
        assert!(matches!(
            RssSource::from_config(&json!({ "max_items": 3 })),
            Err(AdapterError::InvalidConfig(_))
        ));
        assert!(RssSource::from_config(&json!({ "feed_url": "https://example.com/feed" })).is_ok());
    }
}
