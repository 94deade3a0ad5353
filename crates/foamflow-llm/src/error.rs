//! Error types for foamflow-llm

use thiserror::Error;

/// Transport-level failures talking to a completion backend.
///
/// Malformed model output is *not* an error here; it is reported as
/// `StructuredResponse::Malformed` so callers can treat it as a typed
/// generation or planning failure.
#[derive(Error, Debug)]
pub enum LlmError {
    /// Backend answered with a non-success HTTP status.
    #[error("completion request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    /// Backend kept throttling past the retry bound.
    #[error("completion backend throttled after {attempts} attempt(s)")]
    Throttled { attempts: u32 },

    /// Network or client error.
    #[error("completion transport error: {0}")]
    Transport(String),

    /// The HTTP envelope did not contain a completion.
    #[error("invalid completion envelope: {0}")]
    InvalidEnvelope(String),

    /// Backend misconfiguration.
    #[error("invalid backend configuration: {0}")]
    Config(String),

    /// Scripted or stub backend refused the prompt.
    #[error("backend rejected prompt: {0}")]
    Rejected(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

/// Result type for completion operations.
pub type LlmResult<T> = std::result::Result<T, LlmError>;
