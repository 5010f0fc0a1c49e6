//! Error types for the deliberative research pipeline

use thiserror::Error;

use crate::models::{ContextKey, StageId};
use crate::orchestrator::PipelineState;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure of a single completion-service call.
///
/// Stages never let this escape: it is folded into a sentinel record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("completion timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("completion service unreachable: {0}")]
    Unreachable(String),

    #[error("completion service rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("completion service returned no text")]
    EmptyResponse,

    #[error("completion service not configured: {0}")]
    NotConfigured(String),

    #[error("could not decode completion response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. }
            | TransportError::Unreachable(_)
            | TransportError::Quota(_)
            | TransportError::EmptyResponse => true,
            TransportError::Rejected { status, .. } => *status >= 500,
            TransportError::NotConfigured(_) | TransportError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout { after_ms: 0 }
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Rejected {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            TransportError::Unreachable(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Absorbed inside stages
    // =============================

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed {shape} output: {detail}")]
    MalformedOutput { shape: &'static str, detail: String },

    // =============================
    // Surfaced to the caller
    // =============================

    #[error("Stage {stage} requires context field '{field}' which is not present")]
    MissingContextField { stage: StageId, field: ContextKey },

    #[error("Context key '{key}' already written; context is append-only")]
    DuplicateContextKey { key: ContextKey },

    #[error("Pipeline cancelled before {before}")]
    Cancelled { before: PipelineState },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PipelineError {
    /// Errors that indicate a sequencing bug rather than an unreliable environment.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingContextField { .. } | PipelineError::DuplicateContextKey { .. }
        )
    }
}
