//! Error types for foamflow-knowledge

use thiserror::Error;

/// Errors produced by the knowledge layer.
#[derive(Error, Debug)]
pub enum KnowledgeError {
    /// The requested index was never built.
    #[error("index unavailable: {index}")]
    IndexUnavailable { index: String },

    /// A snapshot file exists but could not be interpreted.
    #[error("invalid index snapshot {path}: {reason}")]
    InvalidSnapshot { path: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
