//! Failure diagnoses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::plan::ArtifactId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    MeshQuality,
    NumericalDivergence,
    UndefinedKeyword,
    MissingFile,
    PatchMismatch,
    DimensionMismatch,
    CommandNotFound,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::MeshQuality => "mesh_quality",
            ErrorCategory::NumericalDivergence => "numerical_divergence",
            ErrorCategory::UndefinedKeyword => "undefined_keyword",
            ErrorCategory::MissingFile => "missing_file",
            ErrorCategory::PatchMismatch => "patch_mismatch",
            ErrorCategory::DimensionMismatch => "dimension_mismatch",
            ErrorCategory::CommandNotFound => "command_not_found",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A targeted regeneration request.
///
/// Applying it means re-running generation for `regenerate` only, with the
/// failure log and guidance in each subtask's context. `insert` lists file
/// paths the plan lacks and that must be added as new subtasks first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedPatch {
    pub regenerate: Vec<ArtifactId>,
    #[serde(default)]
    pub insert: Vec<String>,
    pub failure_log: String,
    pub guidance: String,
    #[serde(default)]
    pub advice: Option<String>,
    /// Categories diagnosed in earlier iterations, oldest first.
    #[serde(default)]
    pub previous_categories: Vec<ErrorCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub iteration: u32,
    pub error_category: ErrorCategory,
    pub implicated_artifact_ids: Vec<ArtifactId>,
    pub proposed_patch: ProposedPatch,
    pub confidence: Confidence,
    /// Signature rule that matched, if any.
    #[serde(default)]
    pub matched_rule: Option<String>,
    /// Log line that triggered the match.
    #[serde(default)]
    pub evidence: Option<String>,
}

impl Diagnosis {
    /// No signature matched; the patch is a low-confidence best effort.
    pub fn is_inconclusive(&self) -> bool {
        self.error_category == ErrorCategory::Unknown
    }
}
