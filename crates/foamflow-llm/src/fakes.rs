//! Scripted completion backend (testing only)
//!
//! `ScriptedBackend` answers every prompt through a caller-supplied closure
//! and records the prompts it saw, so tests can assert on what reached the
//! model as well as on what came back.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::backend::CompletionBackend;
use crate::error::LlmResult;
use crate::prompt::StructuredPrompt;

type Responder = dyn Fn(&StructuredPrompt) -> LlmResult<String> + Send + Sync;

/// Deterministic backend driven by a closure.
pub struct ScriptedBackend {
    responder: Arc<Responder>,
    prompts: Mutex<Vec<StructuredPrompt>>,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&StructuredPrompt) -> LlmResult<String> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<StructuredPrompt> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Artifact prompts received for `file_path`, in call order.
    pub fn artifact_prompts(&self, file_path: &str) -> Vec<StructuredPrompt> {
        self.prompts()
            .into_iter()
            .filter(|p| p.file_path() == Some(file_path))
            .collect()
    }
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBackend")
            .field("calls", &self.call_count())
            .finish()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, prompt: &StructuredPrompt) -> LlmResult<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.clone());
        (self.responder)(prompt)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
