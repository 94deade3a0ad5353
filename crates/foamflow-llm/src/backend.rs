//! Completion backend trait.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::LlmResult;
use crate::prompt::StructuredPrompt;
use crate::response::{parse_response, StructuredResponse};

/// A text-completion service.
///
/// Implementations only move text; validation happens in
/// [`complete_structured`].
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &StructuredPrompt) -> LlmResult<String>;

    /// Short identifier for logs.
    fn name(&self) -> &str {
        "backend"
    }
}

/// Call `backend` and validate the answer against the prompt's shape.
pub async fn complete_structured(
    backend: &dyn CompletionBackend,
    prompt: &StructuredPrompt,
) -> LlmResult<StructuredResponse> {
    let raw = backend.complete(prompt).await?;
    let response = parse_response(prompt, &raw);
    match &response {
        StructuredResponse::Malformed { reason, .. } => {
            warn!(backend = backend.name(), kind = ?prompt.kind(), reason = %reason, "malformed completion");
        }
        _ => debug!(backend = backend.name(), kind = ?prompt.kind(), bytes = raw.len(), "completion parsed"),
    }
    Ok(response)
}
