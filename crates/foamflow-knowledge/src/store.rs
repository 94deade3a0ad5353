//! Knowledge Store trait definitions
//!
//! The store exposes similarity search only:
//! - `IndexId`: one index per knowledge category
//! - `Snippet`: one retrievable reference document
//! - `KnowledgeStore`: `search(index, query, top_k)`
//!
//! Implementations must be read-only at pipeline runtime and deterministic for
//! a fixed snapshot and query.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KnowledgeError;

/// Result type for knowledge operations
pub type KnowledgeResult<T> = std::result::Result<T, KnowledgeError>;

// ---------------------------------------------------------------------------
// IndexId
// ---------------------------------------------------------------------------

/// Knowledge categories, one retrieval index each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexId {
    /// Solver and utility command help text.
    CommandReference,
    /// Run scripts of reference cases.
    ScriptReference,
    /// Directory-structure summaries of reference cases.
    CaseStructure,
    /// Per-file configuration content of reference cases.
    FileDetail,
}

impl IndexId {
    /// Every index, in a stable order.
    pub const ALL: [IndexId; 4] = [
        IndexId::CommandReference,
        IndexId::ScriptReference,
        IndexId::CaseStructure,
        IndexId::FileDetail,
    ];

    /// Stable name, also the snapshot file stem.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexId::CommandReference => "command_reference",
            IndexId::ScriptReference => "script_reference",
            IndexId::CaseStructure => "case_structure",
            IndexId::FileDetail => "file_detail",
        }
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexId {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndexId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| KnowledgeError::IndexUnavailable {
                index: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Snippets
// ---------------------------------------------------------------------------

/// One retrievable reference document.
///
/// `id` is the snippet identity used for de-duplication across indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: String,
    pub index: IndexId,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Snippet {
    pub fn new(id: impl Into<String>, index: IndexId, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index,
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Metadata lookup returning `""` when absent.
    pub fn meta(&self, key: &str) -> &str {
        self.metadata.get(key).map(String::as_str).unwrap_or("")
    }
}

/// A snippet with its relevance score.
///
/// Scores are only comparable within a single index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSnippet {
    pub snippet: Snippet,
    pub score: f32,
}

// ---------------------------------------------------------------------------
// KnowledgeStore
// ---------------------------------------------------------------------------

/// Similarity search over pre-built indices.
///
/// Guarantees:
/// - `search` never mutates the index.
/// - Results are ordered by descending score, ties by snippet id.
/// - Searching an index that was never built fails with
///   `KnowledgeError::IndexUnavailable`.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Return at most `top_k` snippets from `index` ranked against `query`.
    async fn search(
        &self,
        index: IndexId,
        query: &str,
        top_k: usize,
    ) -> KnowledgeResult<Vec<ScoredSnippet>>;

    /// Whether `index` was built.
    fn has_index(&self, index: IndexId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_id_roundtrip_names() {
        for id in IndexId::ALL {
            assert_eq!(id.as_str().parse::<IndexId>().unwrap(), id);
        }
        assert!("nope".parse::<IndexId>().is_err());
    }

    #[test]
    fn test_snippet_meta_defaults_to_empty() {
        let s = Snippet::new("a", IndexId::CaseStructure, "body")
            .with_metadata("case_solver", "icoFoam");
        assert_eq!(s.meta("case_solver"), "icoFoam");
        assert_eq!(s.meta("case_domain"), "");
    }

    #[test]
    fn test_index_id_serde_snake_case() {
        let json = serde_json::to_string(&IndexId::FileDetail).unwrap();
        assert_eq!(json, "\"file_detail\"");
    }
}
