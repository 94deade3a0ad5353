//! Foamflow-LLM: structured completion backends
//!
//! The language model is consumed as a black box that turns a
//! [`StructuredPrompt`] into text. Everything that comes back is parsed into
//! a [`StructuredResponse`]; output that does not fit the expected shape
//! becomes [`StructuredResponse::Malformed`] instead of an unchecked payload.
//!
//! ## Key Components
//!
//! - [`CompletionBackend`]: prompt-in / text-out trait
//! - [`complete_structured`]: backend call plus response validation
//! - [`HttpCompletionBackend`]: chat-completions client over `reqwest`
//! - [`fakes::ScriptedBackend`]: deterministic backend for tests

mod backend;
mod error;
pub mod fakes;
pub mod http;
pub mod prompt;
pub mod render;
pub mod response;

pub use backend::{complete_structured, CompletionBackend};
pub use error::{LlmError, LlmResult};
pub use http::{HttpBackendConfig, HttpCompletionBackend};
pub use prompt::{
    ArtifactRequest, CaseCandidate, CaseSummary, DependencyContent, ReferenceText, RepairContext,
    ResponseKind, StructuredPrompt,
};
pub use response::{
    parse_response, ArtifactContent, CaseClassification, RepairAdvice, StructuredResponse,
};
