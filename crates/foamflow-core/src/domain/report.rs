//! Final case report, written as the case summary.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::diagnosis::Diagnosis;
use crate::domain::execution::{ExecutionResult, ExitStatus};
use crate::domain::loop_state::{StageTransition, TerminalStatus};
use crate::domain::plan::ArtifactId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub iteration: u32,
    pub exit_status: ExitStatus,
    pub duration_ms: u64,
    pub succeeded: bool,
    pub artifacts_touched: Vec<ArtifactId>,
}

impl From<&ExecutionResult> for ExecutionSummary {
    fn from(r: &ExecutionResult) -> Self {
        Self {
            iteration: r.iteration,
            exit_status: r.exit_status,
            duration_ms: r.duration_ms,
            succeeded: r.succeeded(),
            artifacts_touched: r.artifacts_touched.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub id: ArtifactId,
    pub version: u32,
    pub digest: String,
}

/// What a finished case run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub run_id: Uuid,
    /// Empty when planning failed before a case name existed.
    pub case_name: String,
    pub case_dir: Option<PathBuf>,
    pub solver_id: Option<String>,
    pub domain_category: Option<String>,
    pub terminal_status: TerminalStatus,
    pub iteration_count: u32,
    pub max_iterations: u32,
    /// Set for `failed_fatal`.
    pub fatal_reason: Option<String>,
    pub executions: Vec<ExecutionSummary>,
    pub diagnoses: Vec<Diagnosis>,
    pub artifacts: Vec<ArtifactSummary>,
    pub transitions: Vec<StageTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CaseReport {
    pub fn succeeded(&self) -> bool {
        self.terminal_status == TerminalStatus::Success
    }
}
