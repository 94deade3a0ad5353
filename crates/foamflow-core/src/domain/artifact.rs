//! Generated artifacts and their version history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::plan::ArtifactId;

/// SHA-256 hex digest of `bytes`.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A superseded version of an artifact, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRevision {
    pub version: u32,
    pub digest: String,
    pub content: String,
    pub superseded_at: DateTime<Utc>,
}

/// Current content of one configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub file_path: String,
    pub content: String,
    pub digest: String,
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Store-wide modification sequence; higher is more recent.
    pub updated_seq: u64,
    pub revisions: Vec<ArtifactRevision>,
}

/// What `ArtifactStore::put` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// Identical content; version unchanged.
    Unchanged,
    Superseded(ArtifactRevision),
}

/// Artifacts of one case, with the digest last written to disk per artifact.
#[derive(Debug, Default, Clone)]
pub struct ArtifactStore {
    artifacts: BTreeMap<ArtifactId, Artifact>,
    materialized: BTreeMap<ArtifactId, String>,
    seq: u64,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an artifact. Prior content is kept as a revision.
    pub fn put(&mut self, id: &ArtifactId, file_path: &str, content: String) -> PutOutcome {
        let digest = content_digest(content.as_bytes());
        let now = Utc::now();

        if let Some(existing) = self.artifacts.get_mut(id) {
            if existing.digest == digest {
                return PutOutcome::Unchanged;
            }
            self.seq += 1;
            let revision = ArtifactRevision {
                version: existing.version,
                digest: std::mem::replace(&mut existing.digest, digest),
                content: std::mem::replace(&mut existing.content, content),
                superseded_at: now,
            };
            existing.revisions.push(revision.clone());
            existing.version += 1;
            existing.updated_at = now;
            existing.updated_seq = self.seq;
            existing.file_path = file_path.to_string();
            return PutOutcome::Superseded(revision);
        }

        self.seq += 1;
        self.artifacts.insert(
            id.clone(),
            Artifact {
                id: id.clone(),
                file_path: file_path.to_string(),
                content,
                digest,
                version: 1,
                updated_at: now,
                updated_seq: self.seq,
                revisions: Vec::new(),
            },
        );
        PutOutcome::Created
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    pub fn content(&self, id: &ArtifactId) -> Option<&str> {
        self.artifacts.get(id).map(|a| a.content.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Artifacts whose content differs from what was last written to disk.
    pub fn dirty(&self) -> Vec<&Artifact> {
        self.artifacts
            .values()
            .filter(|a| self.materialized.get(&a.id) != Some(&a.digest))
            .collect()
    }

    pub fn mark_materialized(&mut self, id: &ArtifactId) {
        if let Some(a) = self.artifacts.get(id) {
            self.materialized.insert(id.clone(), a.digest.clone());
        }
    }

    pub fn most_recently_modified(&self) -> Option<&Artifact> {
        self.artifacts.values().max_by_key(|a| a.updated_seq)
    }
}
