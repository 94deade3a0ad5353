//! In-process similarity backend.
//!
//! `MemoryKnowledgeStore` holds each index as a list of snippets with a
//! precomputed term-frequency vector and ranks them by cosine similarity
//! against the tokenized query. It is immutable once built, so it can be
//! shared through an `Arc` by concurrent cases without locking.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::KnowledgeError;
use crate::store::{IndexId, KnowledgeResult, KnowledgeStore, ScoredSnippet, Snippet};
use crate::tokenize::tokenize;

#[derive(Debug, Clone)]
struct IndexedSnippet {
    snippet: Snippet,
    terms: HashMap<String, f32>,
    norm: f32,
}

impl IndexedSnippet {
    fn new(snippet: Snippet) -> Self {
        let mut text = snippet.content.clone();
        for value in snippet.metadata.values() {
            text.push(' ');
            text.push_str(value);
        }
        let terms = term_frequencies(&text);
        let norm = vector_norm(&terms);
        Self {
            snippet,
            terms,
            norm,
        }
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut terms = HashMap::new();
    for token in tokenize(text) {
        *terms.entry(token).or_insert(0.0) += 1.0;
    }
    terms
}

fn vector_norm(terms: &HashMap<String, f32>) -> f32 {
    terms.values().map(|v| v * v).sum::<f32>().sqrt()
}

fn cosine(query: &HashMap<String, f32>, query_norm: f32, doc: &IndexedSnippet) -> f32 {
    if query_norm == 0.0 || doc.norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = query
        .iter()
        .filter_map(|(term, q)| doc.terms.get(term).map(|d| q * d))
        .sum();
    dot / (query_norm * doc.norm)
}

/// Snapshot file entry: `<dir>/<index_id>.json` holds an array of these.
#[derive(Debug, Deserialize)]
struct SnapshotDocument {
    id: String,
    content: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Deterministic, read-only, in-memory knowledge store.
#[derive(Debug, Default, Clone)]
pub struct MemoryKnowledgeStore {
    indices: BTreeMap<IndexId, Vec<IndexedSnippet>>,
}

impl MemoryKnowledgeStore {
    /// Create a store with no indices built.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build (or replace) `index` from `snippets` (builder pattern).
    ///
    /// Each snippet's `index` field is overwritten with `index`.
    pub fn with_index(mut self, index: IndexId, snippets: Vec<Snippet>) -> Self {
        let docs = snippets
            .into_iter()
            .map(|mut s| {
                s.index = index;
                IndexedSnippet::new(s)
            })
            .collect();
        self.indices.insert(index, docs);
        self
    }

    /// Load every `<dir>/<index_id>.json` snapshot that exists.
    ///
    /// Missing files leave that index unbuilt; searching it later fails with
    /// `IndexUnavailable`.
    pub fn from_snapshot_dir(dir: &Path) -> KnowledgeResult<Self> {
        let mut store = Self::new();
        for index in IndexId::ALL {
            let path = dir.join(format!("{}.json", index.as_str()));
            if !path.exists() {
                debug!(index = %index, path = %path.display(), "no snapshot for index");
                continue;
            }
            let raw = std::fs::read(&path)?;
            let docs: Vec<SnapshotDocument> =
                serde_json::from_slice(&raw).map_err(|e| KnowledgeError::InvalidSnapshot {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            let snippets = docs
                .into_iter()
                .map(|d| Snippet {
                    id: d.id,
                    index,
                    content: d.content,
                    metadata: d.metadata,
                })
                .collect::<Vec<_>>();
            info!(index = %index, documents = snippets.len(), "loaded index snapshot");
            store = store.with_index(index, snippets);
        }
        Ok(store)
    }

    /// Number of documents in `index` (0 when unbuilt).
    pub fn len(&self, index: IndexId) -> usize {
        self.indices.get(&index).map(Vec::len).unwrap_or(0)
    }

    /// Whether no index has been built.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn search(
        &self,
        index: IndexId,
        query: &str,
        top_k: usize,
    ) -> KnowledgeResult<Vec<ScoredSnippet>> {
        let docs = self
            .indices
            .get(&index)
            .ok_or_else(|| KnowledgeError::IndexUnavailable {
                index: index.as_str().to_string(),
            })?;

        let query_terms = term_frequencies(query);
        let query_norm = vector_norm(&query_terms);

        let mut scored: Vec<ScoredSnippet> = docs
            .iter()
            .map(|doc| ScoredSnippet {
                snippet: doc.snippet.clone(),
                score: cosine(&query_terms, query_norm, doc),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.snippet.id.cmp(&b.snippet.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    fn has_index(&self, index: IndexId) -> bool {
        self.indices.contains_key(&index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryKnowledgeStore {
        MemoryKnowledgeStore::new().with_index(
            IndexId::CaseStructure,
            vec![
                Snippet::new("cavity", IndexId::CaseStructure, "lid driven cavity icoFoam")
                    .with_metadata("case_solver", "icoFoam"),
                Snippet::new("pitzDaily", IndexId::CaseStructure, "backward facing step simpleFoam")
                    .with_metadata("case_solver", "simpleFoam"),
                Snippet::new("damBreak", IndexId::CaseStructure, "dam break interFoam multiphase"),
            ],
        )
    }

    #[tokio::test]
    async fn test_search_ranks_best_match_first() {
        let results = store()
            .search(IndexId::CaseStructure, "lid-driven cavity flow", 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet.id, "cavity");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_unbuilt_index_is_unavailable() {
        let err = store()
            .search(IndexId::FileDetail, "controlDict", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_search_is_deterministic() {
        let s = store();
        let a = s.search(IndexId::CaseStructure, "foam", 3).await.unwrap();
        let b = s.search(IndexId::CaseStructure, "foam", 3).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_ties_break_by_snippet_id() {
        let s = MemoryKnowledgeStore::new().with_index(
            IndexId::CommandReference,
            vec![
                Snippet::new("b", IndexId::CommandReference, "same text"),
                Snippet::new("a", IndexId::CommandReference, "same text"),
            ],
        );
        let results = s.search(IndexId::CommandReference, "same", 2).await.unwrap();
        assert_eq!(results[0].snippet.id, "a");
        assert_eq!(results[1].snippet.id, "b");
    }

    #[test]
    fn test_has_index_and_len() {
        let s = store();
        assert!(s.has_index(IndexId::CaseStructure));
        assert!(!s.has_index(IndexId::ScriptReference));
        assert_eq!(s.len(IndexId::CaseStructure), 3);
        assert_eq!(s.len(IndexId::FileDetail), 0);
    }
}
