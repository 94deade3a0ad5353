//! Case plan: the ordered set of file-generation subtasks.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dependency::FileRole;

/// Identity of one artifact. The case-relative file path is used as the id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Generated,
    Failed,
    Patched,
}

/// Unit of planned generation work for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub artifact_id: ArtifactId,
    pub file_path: String,
    pub role: FileRole,
    pub depends_on: BTreeSet<ArtifactId>,
    pub status: SubtaskStatus,
}

impl Subtask {
    /// New pending subtask; the role is derived from the file path.
    pub fn new(file_path: impl Into<String>) -> Self {
        let file_path = file_path.into();
        Self {
            artifact_id: ArtifactId::new(file_path.clone()),
            role: FileRole::classify(&file_path),
            file_path,
            depends_on: BTreeSet::new(),
            status: SubtaskStatus::Pending,
        }
    }

    pub fn with_dependency(mut self, id: impl Into<ArtifactId>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// Whether dependents may consume this artifact.
    pub fn is_available(&self) -> bool {
        matches!(
            self.status,
            SubtaskStatus::Generated | SubtaskStatus::Patched
        )
    }
}

/// The plan for one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasePlan {
    pub case_name: String,
    pub solver_id: String,
    pub domain_category: String,
    /// Finer category of the reference case (e.g. `laminar`, `RAS`).
    pub category: String,
    /// Knowledge-store id of the reference case the file set came from.
    pub reference_id: String,
    pub subtasks: Vec<Subtask>,
}

impl CasePlan {
    pub fn subtask(&self, id: &ArtifactId) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| &s.artifact_id == id)
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.subtask(id).is_some()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.subtasks.iter().map(|s| s.file_path.clone()).collect()
    }

    /// Artifact ids of every subtask with one of `roles`, in declaration order.
    pub fn artifacts_with_roles(&self, roles: &[FileRole]) -> Vec<ArtifactId> {
        self.subtasks
            .iter()
            .filter(|s| roles.contains(&s.role))
            .map(|s| s.artifact_id.clone())
            .collect()
    }

    pub fn all_available(&self) -> bool {
        self.subtasks.iter().all(Subtask::is_available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtask_role_from_path() {
        let s = Subtask::new("system/blockMeshDict");
        assert_eq!(s.role, FileRole::MeshDefinition);
        assert_eq!(s.artifact_id.as_str(), "system/blockMeshDict");
        assert_eq!(s.status, SubtaskStatus::Pending);
        assert!(!s.is_available());
    }

    #[test]
    fn test_artifacts_with_roles_keeps_declaration_order() {
        let plan = CasePlan {
            case_name: "cavity".into(),
            solver_id: "icoFoam".into(),
            domain_category: "incompressible".into(),
            category: "laminar".into(),
            reference_id: "incompressible/icoFoam/cavity".into(),
            subtasks: vec![
                Subtask::new("system/fvSolution"),
                Subtask::new("0/U"),
                Subtask::new("system/controlDict"),
            ],
        };
        let ids = plan.artifacts_with_roles(&[FileRole::SolverControl]);
        assert_eq!(
            ids,
            vec![
                ArtifactId::from("system/fvSolution"),
                ArtifactId::from("system/controlDict")
            ]
        );
    }
}
