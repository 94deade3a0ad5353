//! Structured prompts.
//!
//! Each prompt variant names the response shape it expects, so the parser
//! can validate whatever the backend returns against it.

use serde::{Deserialize, Serialize};

/// Which response shape a prompt expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Classification,
    Artifact,
    Advice,
}

/// A reference case offered to the model during classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseCandidate {
    pub reference_id: String,
    pub case_name: String,
    pub domain: String,
    pub category: String,
    pub solver: String,
    pub score: f32,
}

/// Case-level facts shared by every artifact prompt of one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub case_name: String,
    pub domain: String,
    pub category: String,
    pub solver: String,
}

/// Exact content of an already-generated artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyContent {
    pub file_path: String,
    pub role: String,
    pub content: String,
}

/// A retrieved snippet passed as grounding text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceText {
    pub source_id: String,
    pub content: String,
}

/// Failure evidence attached when an artifact is being regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairContext {
    pub category: String,
    pub failure_log: String,
    pub guidance: String,
    #[serde(default)]
    pub advice: Option<String>,
    /// Categories diagnosed in earlier iterations, oldest first.
    #[serde(default)]
    pub previous_categories: Vec<String>,
    /// Content of the artifact being replaced.
    #[serde(default)]
    pub previous_content: Option<String>,
}

/// Everything needed to produce one configuration artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    pub requirement: String,
    pub case: CaseSummary,
    pub file_path: String,
    pub role: String,
    /// Every file path in the plan, for cross-file consistency.
    pub plan_files: Vec<String>,
    #[serde(default)]
    pub references: Vec<ReferenceText>,
    #[serde(default)]
    pub dependencies: Vec<DependencyContent>,
    /// Description of a user-supplied mesh, when present.
    #[serde(default)]
    pub custom_mesh: Option<String>,
    #[serde(default)]
    pub repair: Option<RepairContext>,
}

/// A prompt whose response shape is known up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuredPrompt {
    /// Choose the reference case that best matches the requirement.
    ClassifyCase {
        requirement: String,
        candidates: Vec<CaseCandidate>,
    },
    /// Produce the content of a single file.
    GenerateArtifact(ArtifactRequest),
    /// Propose a fix for a diagnosed failure.
    AdviseRepair {
        requirement: String,
        category: String,
        log_excerpt: String,
        artifacts: Vec<DependencyContent>,
    },
}

impl StructuredPrompt {
    pub fn kind(&self) -> ResponseKind {
        match self {
            StructuredPrompt::ClassifyCase { .. } => ResponseKind::Classification,
            StructuredPrompt::GenerateArtifact(_) => ResponseKind::Artifact,
            StructuredPrompt::AdviseRepair { .. } => ResponseKind::Advice,
        }
    }

    /// The requirement text every prompt carries.
    pub fn requirement(&self) -> &str {
        match self {
            StructuredPrompt::ClassifyCase { requirement, .. } => requirement,
            StructuredPrompt::GenerateArtifact(req) => &req.requirement,
            StructuredPrompt::AdviseRepair { requirement, .. } => requirement,
        }
    }

    /// Target file path for artifact prompts.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            StructuredPrompt::GenerateArtifact(req) => Some(&req.file_path),
            _ => None,
        }
    }

    /// Repair context for artifact prompts that regenerate a file.
    pub fn repair(&self) -> Option<&RepairContext> {
        match self {
            StructuredPrompt::GenerateArtifact(req) => req.repair.as_ref(),
            _ => None,
        }
    }
}
