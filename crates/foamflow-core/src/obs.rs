//! Structured lifecycle events for case runs.
//!
//! - `CaseSpan` RAII guard that tags everything inside a case run with
//!   `case_name`
//! - `emit_*` functions for the events a run goes through
//!
//! All events are `info!` except failures, which are `warn!`.

use tracing::{info, warn};

use crate::domain::{Confidence, ErrorCategory, ExitStatus, Stage, TerminalStatus};

/// Enters a `foamflow.case` span for as long as it lives.
///
/// Not `Send`; create it only in code that does not hold it across `.await`.
/// Async code should use [`case_span`] with `tracing::Instrument` instead.
pub struct CaseSpan {
    _span: tracing::span::EnteredSpan,
}

impl CaseSpan {
    pub fn enter(case_name: &str) -> Self {
        Self {
            _span: case_span(case_name).entered(),
        }
    }
}

/// The span a case run is instrumented with.
pub fn case_span(case_name: &str) -> tracing::Span {
    tracing::info_span!("foamflow.case", case_name = %case_name)
}

pub fn emit_case_started(run_id: &str, requirement_chars: usize, max_iterations: u32) {
    info!(
        event = "case.started",
        run_id = %run_id,
        requirement_chars = requirement_chars,
        max_iterations = max_iterations,
    );
}

pub fn emit_stage_transition(from: Stage, to: Stage, iteration: u32, reason: Option<&str>) {
    info!(
        event = "stage.transition",
        from = %from,
        to = %to,
        iteration = iteration,
        reason = reason.unwrap_or(""),
    );
}

pub fn emit_artifact_generated(artifact_id: &str, version: u32, bytes: usize, repaired: bool) {
    info!(
        event = "artifact.generated",
        artifact_id = %artifact_id,
        version = version,
        bytes = bytes,
        repaired = repaired,
    );
}

pub fn emit_execution_finished(
    iteration: u32,
    exit_status: &ExitStatus,
    duration_ms: u64,
    succeeded: bool,
) {
    if succeeded {
        info!(
            event = "execution.finished",
            iteration = iteration,
            exit_status = ?exit_status,
            duration_ms = duration_ms,
            succeeded = succeeded,
        );
    } else {
        warn!(
            event = "execution.finished",
            iteration = iteration,
            exit_status = ?exit_status,
            duration_ms = duration_ms,
            succeeded = succeeded,
        );
    }
}

pub fn emit_diagnosis(
    iteration: u32,
    category: ErrorCategory,
    confidence: Confidence,
    implicated: usize,
) {
    warn!(
        event = "diagnosis.emitted",
        iteration = iteration,
        category = %category,
        confidence = ?confidence,
        implicated = implicated,
    );
}

pub fn emit_case_finished(
    run_id: &str,
    status: TerminalStatus,
    iterations: u32,
    duration_ms: u64,
) {
    info!(
        event = "case.finished",
        run_id = %run_id,
        status = %status,
        iterations = iterations,
        duration_ms = duration_ms,
    );
}
