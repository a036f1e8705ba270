//! Error types for the ragline pipeline engine
//!
//! Provides:
//! - Distinct error variants for the fatal failure modes of the pipeline
//! - Stage attribution so a caller can tell where a chain aborted
//! - Machine-readable error kinds for transport-layer translation
//!
//! Degraded conditions (history load failure, entity search failure,
//! rewrite failure) are deliberately NOT representable here: stages handle
//! them locally by logging and applying a default. An empty merged result
//! set is a policy outcome, not an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Machine-readable error kinds for client/transport handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Primary chunk search failed
    SearchError,
    /// Rerank model call failed
    RerankError,
    /// Chat model call failed
    ChatError,
    /// Embedding call failed
    EmbeddingError,
    /// User input rejected by the content-safety gate
    ContentSafety,
    /// Prompt/context template could not be rendered
    TemplateError,
    /// Store (vector/keyword/message) access failed
    StoreError,
    /// Provider or stage resolution failure at composition time
    ConfigurationError,
    /// Request was cancelled by the caller
    Cancelled,
    /// Anything else
    InternalError,
}

/// Fatal, chain-aborting pipeline errors.
///
/// Every variant except `Cancelled` carries the stage that raised it.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("[{stage}] search failed: {message}")]
    Search { stage: &'static str, message: String },

    #[error("[{stage}] rerank failed: {message}")]
    Rerank { stage: &'static str, message: String },

    #[error("[{stage}] chat model call failed: {message}")]
    Chat { stage: &'static str, message: String },

    #[error("[{stage}] embedding failed: {message}")]
    Embedding { stage: &'static str, message: String },

    #[error("[{stage}] query rejected by content-safety validation")]
    ContentSafety { stage: &'static str },

    #[error("[{stage}] template rendering failed: {message}")]
    Template { stage: &'static str, message: String },

    #[error("[{stage}] store access failed: {message}")]
    Store { stage: &'static str, message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("[{stage}] internal error: {message}")]
    Internal { stage: &'static str, message: String },

    #[error("provider error: {0}")]
    Provider(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn search(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Search { stage, message: message.into() }
    }

    pub fn rerank(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Rerank { stage, message: message.into() }
    }

    pub fn chat(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Chat { stage, message: message.into() }
    }

    pub fn embedding(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Embedding { stage, message: message.into() }
    }

    pub fn content_safety(stage: &'static str) -> Self {
        Self::ContentSafety { stage }
    }

    pub fn template(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Template { stage, message: message.into() }
    }

    pub fn store(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Store { stage, message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Internal { stage, message: message.into() }
    }

    /// Get the machine-readable kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Search { .. } => ErrorKind::SearchError,
            PipelineError::Rerank { .. } => ErrorKind::RerankError,
            PipelineError::Chat { .. } => ErrorKind::ChatError,
            PipelineError::Embedding { .. } => ErrorKind::EmbeddingError,
            PipelineError::ContentSafety { .. } => ErrorKind::ContentSafety,
            PipelineError::Template { .. } => ErrorKind::TemplateError,
            PipelineError::Store { .. } => ErrorKind::StoreError,
            PipelineError::Configuration { .. } => ErrorKind::ConfigurationError,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Internal { .. } => ErrorKind::InternalError,
            PipelineError::Provider(_) => ErrorKind::InternalError,
        }
    }

    /// Get the stage that raised this error, if attributed
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            PipelineError::Search { stage, .. }
            | PipelineError::Rerank { stage, .. }
            | PipelineError::Chat { stage, .. }
            | PipelineError::Embedding { stage, .. }
            | PipelineError::ContentSafety { stage }
            | PipelineError::Template { stage, .. }
            | PipelineError::Store { stage, .. }
            | PipelineError::Internal { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Cancellation is a terminal state, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
