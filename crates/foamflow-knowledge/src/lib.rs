//! Foamflow-Knowledge: read-only retrieval indices
//!
//! This crate provides the Knowledge Store consumed by the foamflow pipeline.
//! Indices are built by an offline preprocessing step and are never mutated
//! while a case is running, so a single store can be shared across any number
//! of concurrent cases.
//!
//! ## Layer 0 - Data
//!
//! Focus: similarity search over reference material.
//!
//! ## Key Components
//!
//! - `KnowledgeStore`: the similarity-search trait
//! - `MemoryKnowledgeStore`: deterministic in-process backend loaded from snapshots
//! - `parse_directory_structure`: reads reference case layouts

mod error;
pub mod memory;
pub mod store;
pub mod structure;
pub mod tokenize;

pub use error::KnowledgeError;
pub use memory::MemoryKnowledgeStore;
pub use store::{IndexId, KnowledgeResult, KnowledgeStore, ScoredSnippet, Snippet};
pub use structure::{parse_directory_structure, DirectoryEntry};
pub use tokenize::tokenize;
