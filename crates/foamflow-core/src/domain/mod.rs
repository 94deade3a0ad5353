//! Domain models for foamflow.
//!
//! Canonical definitions for the pipeline entities:
//! - `UserRequirement`: immutable input text plus optional custom mesh
//! - `CasePlan` / `Subtask`: planned generation work
//! - `Artifact` / `ArtifactStore`: generated files and their versions
//! - `ExecutionResult`, `Diagnosis`: one per run, one per failed run
//! - `LoopState`, `CaseReport`: control state and its final summary

pub mod artifact;
pub mod diagnosis;
pub mod error;
pub mod execution;
pub mod loop_state;
pub mod plan;
pub mod report;
pub mod requirement;

pub use artifact::{content_digest, Artifact, ArtifactRevision, ArtifactStore, PutOutcome};
pub use diagnosis::{Confidence, Diagnosis, ErrorCategory, ProposedPatch};
pub use error::{FoamError, Result};
pub use execution::{ExecutionResult, ExitStatus};
pub use loop_state::{LoopState, Stage, StageTransition, TerminalStatus};
pub use plan::{ArtifactId, CasePlan, Subtask, SubtaskStatus};
pub use report::{ArtifactSummary, CaseReport, ExecutionSummary};
pub use requirement::{CustomMesh, MeshFormat, UserRequirement};
