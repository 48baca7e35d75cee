//! Errors produced by engines.

use std::time::Duration;

/// Largest upstream error body kept in an [`EngineError::Http`].
pub const MAX_ERROR_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Upstream answered with a non-2xx status.
    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// The SSE stream violated the line protocol.
    #[error("upstream stream error: {0}")]
    Stream(String),

    /// The upstream reported an error inside the stream.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("generation_failed after {attempts} attempt(s): {last}")]
    GenerationFailed {
        attempts: usize,
        #[source]
        last: Box<EngineError>,
    },

    #[error("expected {expected} scores, upstream returned {actual}")]
    ScoreCountMismatch { expected: usize, actual: usize },

    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// The consumer went away (client disconnect).
    #[error("request canceled")]
    Canceled,

    #[error("invalid engine input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    /// Whether a schema retry may follow this error. Caller-side conditions
    /// end the loop immediately.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::Canceled | EngineError::Timeout(_) | EngineError::InvalidInput(_)
        )
    }

    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::GenerationFailed { .. } => "generation_failed",
            EngineError::Timeout(_) => "upstream_timeout",
            _ => "engine_error",
        }
    }
}
