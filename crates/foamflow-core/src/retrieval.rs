//! Retriever: read-only access to the knowledge store.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use foamflow_knowledge::{IndexId, KnowledgeStore, ScoredSnippet};

use crate::domain::Result;

/// One index query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub index: IndexId,
    pub query: String,
    pub top_k: usize,
}

impl RetrievalQuery {
    pub fn new(index: IndexId, query: impl Into<String>, top_k: usize) -> Self {
        Self {
            index,
            query: query.into(),
            top_k,
        }
    }
}

/// Cheap to clone; the store is shared.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn KnowledgeStore>,
}

impl Retriever {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }

    pub fn has_index(&self, index: IndexId) -> bool {
        self.store.has_index(index)
    }

    /// Ranked snippets from one index.
    pub async fn search(
        &self,
        index: IndexId,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredSnippet>> {
        let hits = self.store.search(index, query, top_k).await?;
        debug!(index = %index, top_k, hits = hits.len(), "retrieved snippets");
        Ok(hits)
    }

    /// Run `queries` concurrently.
    ///
    /// Results are concatenated in query order and deduplicated by snippet
    /// identity. Scores are never compared across indices.
    pub async fn search_many(&self, queries: &[RetrievalQuery]) -> Result<Vec<ScoredSnippet>> {
        let results = join_all(
            queries
                .iter()
                .map(|q| self.search(q.index, &q.query, q.top_k)),
        )
        .await;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for hits in results {
            for hit in hits? {
                if seen.insert((hit.snippet.index, hit.snippet.id.clone())) {
                    merged.push(hit);
                }
            }
        }
        Ok(merged)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever").finish_non_exhaustive()
    }
}
