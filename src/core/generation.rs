//! Generation and research service seams.
//!
//! The engine does not care how text is produced; it only needs the fields
//! below and a retryable/non-retryable hint on failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::error::EngineError;
use crate::core::model::AgentProfile;

/// A topic chosen by discovery or supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Working title.
    pub title: String,
    /// Short context.
    pub summary: Option<String>,
    /// Origin URL.
    pub source_url: Option<String>,
    /// Keywords to target.
    pub keywords: Vec<String>,
}

/// Research notes gathered before generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchNotes {
    /// Condensed findings.
    pub summary: String,
    /// URLs consulted.
    pub sources: Vec<String>,
    /// Suggested keywords.
    pub keywords: Vec<String>,
}

/// Input to the generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Persona and style.
    pub agent: AgentProfile,
    /// What to write about.
    pub topic: Topic,
    /// Research, when the research stage succeeded.
    pub research: Option<ResearchNotes>,
    /// Desired length in words.
    pub target_words: usize,
}

/// Output of the generation service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    /// Headline.
    pub title: String,
    /// Article body (markdown).
    pub body: String,
    /// SEO title.
    pub meta_title: String,
    /// SEO description.
    pub meta_description: String,
    /// Target keywords, primary first.
    pub keywords: Vec<String>,
    /// Tokens consumed.
    pub tokens_used: u64,
    /// Cost units charged.
    pub cost_units: u64,
}

/// Generation or research failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct GenerationError {
    /// Upstream message.
    pub message: String,
    /// Whether trying again may help.
    pub retryable: bool,
}

impl GenerationError {
    /// Failure worth retrying (rate limit, overload, timeout).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Failure that will repeat (bad request, content policy).
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<GenerationError> for EngineError {
    fn from(e: GenerationError) -> Self {
        Self::GenerationService {
            message: e.message,
            retryable: e.retryable,
        }
    }
}

/// External text generation service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Write an article.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent, GenerationError>;
}

/// Optional research stage.
#[async_trait]
pub trait ResearchService: Send + Sync {
    /// Gather notes on a topic.
    async fn research(
        &self,
        topic: &Topic,
        agent: &AgentProfile,
    ) -> Result<ResearchNotes, GenerationError>;
}
