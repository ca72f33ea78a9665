//! Error taxonomy shared by the pipeline, the retry engine and the worker pool.
//!
//! The retry engine never inspects variants directly; it only sees the
//! [`FailureClass`] returned by [`EngineError::classification`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Binary classification consumed by the retry engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// May succeed if attempted again later.
    Transient,
    /// Will fail the same way on every attempt.
    Permanent,
}

/// Errors produced while executing engine work.
///
/// The `Display` form is `<Kind>: <detail>` and is stored verbatim as the
/// human-readable reason on jobs and artifacts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Tenant budget exhausted for a governed resource.
    #[error("QuotaExceeded: {0}")]
    QuotaExceeded(String),
    /// No adapter registered under the requested type tag.
    #[error("UnknownAdapterType: {0}")]
    UnknownAdapterType(String),
    /// Adapter config bag is missing required fields or is malformed.
    #[error("InvalidAdapterConfig: {0}")]
    InvalidAdapterConfig(String),
    /// Artifact failed a validation rule.
    #[error("ValidationFailed: {0}")]
    ValidationFailed(String),
    /// Network error, timeout or upstream 5xx from an adapter.
    #[error("AdapterTransientError: {0}")]
    AdapterTransient(String),
    /// Authentication or malformed-request failure from an adapter.
    #[error("AdapterPermanentError: {0}")]
    AdapterPermanent(String),
    /// Generation service failure.
    #[error("GenerationServiceError: {message}")]
    GenerationService {
        /// Upstream message.
        message: String,
        /// Whether the service reported the failure as retryable.
        retryable: bool,
    },
    /// Attempt ran past its hard time limit.
    #[error("TimeLimitExceeded: {0}")]
    TimeLimitExceeded(String),
    /// Cancelled by an operator or by the soft time limit.
    #[error("Cancelled: {0}")]
    Cancelled(String),
    /// Referenced entity does not exist.
    #[error("NotFound: {0}")]
    NotFound(String),
    /// Illegal state transition (e.g. artifact moving backwards).
    #[error("InvalidTransition: {0}")]
    InvalidTransition(String),
    /// Persistence collaborator failure.
    #[error("StorageError: {0}")]
    Storage(String),
    /// Job payload could not be decoded.
    #[error("PayloadError: {0}")]
    Payload(String),
    /// Handler panicked.
    #[error("WorkerPanic: {0}")]
    Panic(String),
    /// The engine is draining or stopped and no longer accepts work.
    #[error("ShuttingDown: {0}")]
    ShuttingDown(String),
}

impl EngineError {
    /// Transient/permanent classification for the retry engine.
    pub const fn classification(&self) -> FailureClass {
        match self {
            Self::AdapterTransient(_)
            | Self::TimeLimitExceeded(_)
            | Self::Storage(_)
            | Self::Panic(_) => FailureClass::Transient,
            Self::GenerationService { retryable, .. } => {
                if *retryable {
                    FailureClass::Transient
                } else {
                    FailureClass::Permanent
                }
            }
            Self::QuotaExceeded(_)
            | Self::UnknownAdapterType(_)
            | Self::InvalidAdapterConfig(_)
            | Self::ValidationFailed(_)
            | Self::AdapterPermanent(_)
            | Self::Cancelled(_)
            | Self::NotFound(_)
            | Self::InvalidTransition(_)
            | Self::Payload(_)
            | Self::ShuttingDown(_) => FailureClass::Permanent,
        }
    }

    /// Whether this is a business-rule rejection rather than a failure.
    ///
    /// Rejections end the job as `Rejected` instead of being dead-lettered.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_) | Self::ValidationFailed(_))
    }

    /// Short kind name, the prefix of the `Display` form.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::QuotaExceeded(_) => "QuotaExceeded",
            Self::UnknownAdapterType(_) => "UnknownAdapterType",
            Self::InvalidAdapterConfig(_) => "InvalidAdapterConfig",
            Self::ValidationFailed(_) => "ValidationFailed",
            Self::AdapterTransient(_) => "AdapterTransientError",
            Self::AdapterPermanent(_) => "AdapterPermanentError",
            Self::GenerationService { .. } => "GenerationServiceError",
            Self::TimeLimitExceeded(_) => "TimeLimitExceeded",
            Self::Cancelled(_) => "Cancelled",
            Self::NotFound(_) => "NotFound",
            Self::InvalidTransition(_) => "InvalidTransition",
            Self::Storage(_) => "StorageError",
            Self::Payload(_) => "PayloadError",
            Self::Panic(_) => "WorkerPanic",
            Self::ShuttingDown(_) => "ShuttingDown",
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
