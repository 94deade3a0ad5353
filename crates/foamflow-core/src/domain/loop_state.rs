//! Loop state machine.
//!
//! ```text
//! PLANNING -> GENERATING -> EXECUTING -> SUCCESS
//!                               |
//!                               v
//!                           REVIEWING -> PATCHING -> EXECUTING
//!                               |
//!                               v
//!                        FAILED_EXHAUSTED
//! ```
//!
//! Any non-terminal stage may also move to `FAILED_FATAL`. The iteration
//! counter is bumped on every entry into `EXECUTING` and nowhere else.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{FoamError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Generating,
    Executing,
    Reviewing,
    Patching,
    Success,
    FailedExhausted,
    FailedFatal,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Generating => "generating",
            Stage::Executing => "executing",
            Stage::Reviewing => "reviewing",
            Stage::Patching => "patching",
            Stage::Success => "success",
            Stage::FailedExhausted => "failed_exhausted",
            Stage::FailedFatal => "failed_fatal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Success | Stage::FailedExhausted | Stage::FailedFatal
        )
    }

    fn can_move_to(&self, to: Stage) -> bool {
        use Stage::*;
        match (self, to) {
            (s, FailedFatal) => !s.is_terminal(),
            (Planning, Generating) => true,
            (Generating, Executing) => true,
            (Executing, Success) | (Executing, Reviewing) => true,
            (Reviewing, Patching) | (Reviewing, FailedExhausted) => true,
            (Patching, Executing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Running,
    Success,
    FailedExhausted,
    FailedFatal,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Running => "running",
            TerminalStatus::Success => "success",
            TerminalStatus::FailedExhausted => "failed_exhausted",
            TerminalStatus::FailedFatal => "failed_fatal",
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub iteration: u32,
    #[serde(default)]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Per-case loop state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    iteration_count: u32,
    max_iterations: u32,
    stage: Stage,
    terminal_status: TerminalStatus,
    transitions: Vec<StageTransition>,
}

impl LoopState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration_count: 0,
            max_iterations,
            stage: Stage::Planning,
            terminal_status: TerminalStatus::Running,
            transitions: Vec::new(),
        }
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn terminal_status(&self) -> TerminalStatus {
        self.terminal_status
    }

    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Whether another execution fits in the budget.
    pub fn budget_remaining(&self) -> bool {
        self.iteration_count < self.max_iterations
    }

    /// Move to `to`, rejecting edges the state machine does not have.
    pub fn transition(&mut self, to: Stage, reason: Option<String>) -> Result<&StageTransition> {
        if !self.stage.can_move_to(to) {
            return Err(FoamError::InvalidTransition {
                from: self.stage.to_string(),
                to: to.to_string(),
            });
        }
        if to == Stage::Executing {
            if !self.budget_remaining() {
                return Err(FoamError::InvalidTransition {
                    from: self.stage.to_string(),
                    to: format!("{to} (iteration budget of {} spent)", self.max_iterations),
                });
            }
            self.iteration_count += 1;
        }
        self.terminal_status = match to {
            Stage::Success => TerminalStatus::Success,
            Stage::FailedExhausted => TerminalStatus::FailedExhausted,
            Stage::FailedFatal => TerminalStatus::FailedFatal,
            _ => TerminalStatus::Running,
        };

        let from = std::mem::replace(&mut self.stage, to);
        self.transitions.push(StageTransition {
            from,
            to,
            iteration: self.iteration_count,
            reason,
            at: Utc::now(),
        });
        let idx = self.transitions.len() - 1;
        Ok(&self.transitions[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut s = LoopState::new(3);
        s.transition(Stage::Generating, None).unwrap();
        s.transition(Stage::Executing, None).unwrap();
        assert_eq!(s.iteration_count(), 1);
        s.transition(Stage::Success, None).unwrap();
        assert_eq!(s.terminal_status(), TerminalStatus::Success);
        assert!(s.is_terminal());
        assert_eq!(s.transitions().len(), 3);
    }

    #[test]
    fn test_iteration_counts_only_executing_entries() {
        let mut s = LoopState::new(5);
        s.transition(Stage::Generating, None).unwrap();
        for _ in 0..3 {
            s.transition(Stage::Executing, None).unwrap();
            s.transition(Stage::Reviewing, None).unwrap();
            s.transition(Stage::Patching, None).unwrap();
        }
        assert_eq!(s.iteration_count(), 3);
    }

    #[test]
    fn test_executing_beyond_budget_rejected() {
        let mut s = LoopState::new(1);
        s.transition(Stage::Generating, None).unwrap();
        s.transition(Stage::Executing, None).unwrap();
        s.transition(Stage::Reviewing, None).unwrap();
        assert!(!s.budget_remaining());
        s.transition(Stage::Patching, None).unwrap();
        assert!(s.transition(Stage::Executing, None).is_err());
        assert_eq!(s.iteration_count(), 1);
    }

    #[test]
    fn test_illegal_edges_rejected() {
        let mut s = LoopState::new(2);
        assert!(matches!(
            s.transition(Stage::Executing, None),
            Err(FoamError::InvalidTransition { .. })
        ));
        s.transition(Stage::FailedFatal, Some("planning failed".into()))
            .unwrap();
        assert!(s.transition(Stage::FailedFatal, None).is_err());
        assert_eq!(s.terminal_status(), TerminalStatus::FailedFatal);
    }
}
