//! foamflow core library
//!
//! The case pipeline: planning, dependency-ordered generation, execution,
//! review and the loop controller that sequences them.

pub mod config;
pub mod controller;
pub mod dependency;
pub mod domain;
pub mod executor;
pub mod generator;
pub mod history;
pub mod obs;
pub mod planner;
pub mod retrieval;
pub mod reviewer;
pub mod telemetry;

pub use config::{ExecutionMode, ExecutorConfig, PipelineConfig, RetrievalConfig, ReviewConfig};
pub use controller::LoopController;
pub use dependency::{
    generation_levels, generation_order, DependencyRule, DependencyRuleTable, FileRole,
};
pub use domain::{
    content_digest, Artifact, ArtifactId, ArtifactRevision, ArtifactStore, ArtifactSummary,
    CasePlan, CaseReport, Confidence, CustomMesh, Diagnosis, ErrorCategory, ExecutionResult,
    ExecutionSummary, ExitStatus, FoamError, LoopState, MeshFormat, ProposedPatch, PutOutcome,
    Result, Stage, StageTransition, Subtask, SubtaskStatus, TerminalStatus, UserRequirement,
};
pub use executor::{CaseLease, CaseRegistry, Executor};
pub use generator::{GeneratedArtifact, Generator};
pub use history::{read_summary, CaseHistory};
pub use obs::CaseSpan;
pub use planner::{PlannedCase, Planner, ReferenceCase};
pub use retrieval::{RetrievalQuery, Retriever};
pub use reviewer::{Reviewer, SignatureRule, SignatureTable};
pub use telemetry::init_tracing;
