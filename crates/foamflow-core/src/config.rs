//! Pipeline configuration.
//!
//! `PipelineConfig` is an immutable value built once (defaults, a TOML file,
//! then environment overrides) and handed to component constructors.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{FoamError, Result};

pub const ENV_MAX_ITERATIONS: &str = "FOAMFLOW_MAX_ITERATIONS";
pub const ENV_SOLVER_TIMEOUT_SECS: &str = "FOAMFLOW_SOLVER_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Snippets requested per index query.
    pub top_k: usize,
    /// Minimum relevance a reference case needs to be planned from.
    pub min_relevance: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            min_relevance: 0.05,
        }
    }
}

/// Where the solver runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Child process on this machine.
    Local,
    /// Batch queue (Slurm-compatible command line).
    Queued {
        submit_program: String,
        status_program: String,
        cancel_program: String,
        poll_interval_secs: u64,
        /// Extra `#SBATCH` directives, without the prefix.
        #[serde(default)]
        directives: Vec<String>,
    },
}

impl ExecutionMode {
    pub fn slurm() -> Self {
        ExecutionMode::Queued {
            submit_program: "sbatch".to_string(),
            status_program: "squeue".to_string(),
            cancel_program: "scancel".to_string(),
            poll_interval_secs: 10,
            directives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Case-relative run script.
    pub run_script: String,
    /// Shell file sourced before the run script (e.g. `$WM_PROJECT_DIR/etc/bashrc`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_bootstrap: Option<PathBuf>,
    pub timeout_secs: u64,
    pub mode: ExecutionMode,
    /// Remove logs and time directories of the previous run first.
    pub clean_previous_outputs: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            run_script: "Allrun".to_string(),
            environment_bootstrap: None,
            timeout_secs: 36_000,
            mode: ExecutionMode::Local,
            clean_previous_outputs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Log lines carried into a repair request.
    pub log_tail_lines: usize,
    /// Ask the completion backend for free-text repair advice.
    pub use_advisor: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            log_tail_lines: 200,
            use_advisor: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_iterations: u32,
    /// Per-artifact attempt limit before `GenerationFailed`.
    pub generation_attempts: u32,
    /// Concurrent generations within one dependency level.
    pub generation_workers: usize,
    pub retrieval: RetrievalConfig,
    pub executor: ExecutorConfig,
    pub review: ReviewConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            generation_attempts: 3,
            generation_workers: 4,
            retrieval: RetrievalConfig::default(),
            executor: ExecutorConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| FoamError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FoamError::InvalidConfig(e.to_string()))
    }

    /// Apply `FOAMFLOW_MAX_ITERATIONS` and `FOAMFLOW_SOLVER_TIMEOUT_SECS`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(ENV_MAX_ITERATIONS) {
            self.max_iterations = raw.trim().parse().map_err(|_| {
                FoamError::InvalidConfig(format!("{ENV_MAX_ITERATIONS} is not a number: {raw}"))
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_SOLVER_TIMEOUT_SECS) {
            self.executor.timeout_secs = raw.trim().parse().map_err(|_| {
                FoamError::InvalidConfig(format!(
                    "{ENV_SOLVER_TIMEOUT_SECS} is not a number: {raw}"
                ))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(FoamError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.generation_attempts == 0 {
            return Err(FoamError::InvalidConfig(
                "generation_attempts must be at least 1".to_string(),
            ));
        }
        if self.generation_workers == 0 {
            return Err(FoamError::InvalidConfig(
                "generation_workers must be at least 1".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(FoamError::InvalidConfig(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            return Err(FoamError::InvalidConfig(
                "retrieval.min_relevance must be within [0, 1]".to_string(),
            ));
        }
        if self.executor.timeout_secs == 0 {
            return Err(FoamError::InvalidConfig(
                "executor.timeout_secs must be at least 1".to_string(),
            ));
        }
        let script = Path::new(&self.executor.run_script);
        if self.executor.run_script.trim().is_empty()
            || script.is_absolute()
            || script.components().any(|c| c == std::path::Component::ParentDir)
        {
            return Err(FoamError::InvalidConfig(format!(
                "executor.run_script must be a case-relative path: {}",
                self.executor.run_script
            )));
        }
        if let ExecutionMode::Queued {
            submit_program,
            status_program,
            poll_interval_secs,
            ..
        } = &self.executor.mode
        {
            if submit_program.is_empty() || status_program.is_empty() {
                return Err(FoamError::InvalidConfig(
                    "queued mode needs submit_program and status_program".to_string(),
                ));
            }
            if *poll_interval_secs == 0 {
                return Err(FoamError::InvalidConfig(
                    "queued poll_interval_secs must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}
