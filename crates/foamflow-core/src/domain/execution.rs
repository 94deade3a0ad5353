//! Execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::plan::ArtifactId;

/// How the solver process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited { code: i32 },
    /// Terminated by a signal not sent by the executor.
    Signaled,
    Timeout,
    Cancelled,
}

impl ExitStatus {
    pub fn is_zero(&self) -> bool {
        matches!(self, ExitStatus::Exited { code: 0 })
    }
}

/// One executor invocation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// 1-based iteration this execution belongs to.
    pub iteration: u32,
    pub exit_status: ExitStatus,
    pub duration_ms: u64,
    /// stdout, stderr and solver log files, verbatim, with `==> name <==` headers.
    pub captured_log: String,
    /// Artifacts written to disk for this execution.
    pub artifacts_touched: Vec<ArtifactId>,
    /// False when a solver log reports an error or lacks its `End` marker.
    pub logs_complete: bool,
    /// Batch job id in queued mode.
    #[serde(default)]
    pub job_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_status.is_zero() && self.logs_complete
    }

    /// Last `lines` lines of the captured log.
    pub fn log_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.captured_log.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}
