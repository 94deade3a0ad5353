//! Pipeline error taxonomy.

use foamflow_knowledge::KnowledgeError;
use foamflow_llm::LlmError;

/// Foamflow pipeline errors.
///
/// Only the variants the loop controller cannot turn into a typed case
/// outcome escape `LoopController::run`; everything else ends up in the
/// `CaseReport`.
#[derive(Debug, thiserror::Error)]
pub enum FoamError {
    #[error("planning failed: {reason}")]
    PlanningFailed { reason: String },

    #[error("dependency cycle among artifacts: {}", artifacts.join(", "))]
    DependencyCycle { artifacts: Vec<String> },

    #[error("artifact {artifact} depends on unknown artifact {missing}")]
    UnknownDependency { artifact: String, missing: String },

    #[error("generation failed for {artifact_id} after {attempts} attempt(s): {reason}")]
    GenerationFailed {
        artifact_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("knowledge index unavailable: {index}")]
    IndexUnavailable { index: String },

    #[error("knowledge store error: {0}")]
    Knowledge(String),

    #[error("failed to launch solver: {reason}")]
    Launch { reason: String },

    #[error("case {case} already has an execution in flight")]
    CaseBusy { case: String },

    #[error("illegal stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid requirement: {0}")]
    InvalidRequirement(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("completion backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FoamError {
    /// Planning-stage contract violations: not repairable, never retried.
    pub fn is_planning_failure(&self) -> bool {
        matches!(
            self,
            FoamError::PlanningFailed { .. }
                | FoamError::DependencyCycle { .. }
                | FoamError::UnknownDependency { .. }
        )
    }
}

impl From<KnowledgeError> for FoamError {
    fn from(err: KnowledgeError) -> Self {
        match err {
            KnowledgeError::IndexUnavailable { index } => FoamError::IndexUnavailable { index },
            KnowledgeError::Io(e) => FoamError::Io(e),
            other => FoamError::Knowledge(other.to_string()),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, FoamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planning_failures() {
        assert!(FoamError::PlanningFailed {
            reason: "no match".into()
        }
        .is_planning_failure());
        assert!(FoamError::DependencyCycle {
            artifacts: vec!["0/U".into(), "system/fvSolution".into()]
        }
        .is_planning_failure());
        assert!(!FoamError::GenerationFailed {
            artifact_id: "0/U".into(),
            attempts: 3,
            reason: "malformed".into()
        }
        .is_planning_failure());
    }

    #[test]
    fn test_cycle_display_lists_artifacts() {
        let err = FoamError::DependencyCycle {
            artifacts: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle among artifacts: a, b");
    }

    #[test]
    fn test_index_unavailable_from_knowledge_error() {
        let err: FoamError = KnowledgeError::IndexUnavailable {
            index: "file_detail".into(),
        }
        .into();
        assert!(matches!(err, FoamError::IndexUnavailable { index } if index == "file_detail"));
    }
}
