//! Loop controller: the one place that decides retry versus terminal.
//!
//! ```text
//! PLANNING -> GENERATING -> EXECUTING -> SUCCESS
//!                              |  ^
//!                              v  |
//!                         REVIEWING -> PATCHING
//!                              |
//!                              v
//!                      FAILED_EXHAUSTED
//! ```
//!
//! Any non-terminal stage may move to `FAILED_FATAL`. Component failures
//! come back as values and are mapped to transitions here; `run` only
//! returns `Err` when the case is busy or its history cannot be written.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use foamflow_knowledge::KnowledgeStore;
use foamflow_llm::CompletionBackend;

use crate::config::PipelineConfig;
use crate::dependency::DependencyRuleTable;
use crate::domain::{
    ArtifactId, ArtifactStore, ArtifactSummary, CasePlan, CaseReport, Diagnosis, ExecutionSummary,
    ExitStatus, LoopState, Result, Stage, Subtask, UserRequirement,
};
use crate::executor::{CaseRegistry, Executor};
use crate::generator::Generator;
use crate::history::CaseHistory;
use crate::obs;
use crate::planner::{PlannedCase, Planner};
use crate::retrieval::Retriever;
use crate::reviewer::{Reviewer, SignatureTable};

/// Mutable bookkeeping of one `run` call.
struct CaseRun {
    run_id: Uuid,
    state: LoopState,
    executions: Vec<ExecutionSummary>,
    diagnoses: Vec<Diagnosis>,
    fatal_reason: Option<String>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl CaseRun {
    fn new(max_iterations: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: LoopState::new(max_iterations),
            executions: Vec::new(),
            diagnoses: Vec::new(),
            fatal_reason: None,
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    fn advance(&mut self, to: Stage, reason: Option<String>) -> Result<()> {
        let from = self.state.stage();
        let transition = self.state.transition(to, reason)?;
        obs::emit_stage_transition(from, to, transition.iteration, transition.reason.as_deref());
        Ok(())
    }

    fn fail_fatal(&mut self, reason: String) -> Result<()> {
        warn!(reason = %reason, "case failed fatally");
        self.fatal_reason = Some(reason.clone());
        self.advance(Stage::FailedFatal, Some(reason))
    }
}

pub struct LoopController {
    config: PipelineConfig,
    rules: Arc<DependencyRuleTable>,
    signatures: Arc<SignatureTable>,
    planner: Planner,
    generator: Generator,
    executor: Executor,
    reviewer: Reviewer,
    registry: CaseRegistry,
}

impl LoopController {
    pub fn new(
        config: PipelineConfig,
        knowledge: Arc<dyn KnowledgeStore>,
        backend: Arc<dyn CompletionBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let rules = Arc::new(DependencyRuleTable::standard());
        rules.validate()?;
        let signatures = Arc::new(SignatureTable::standard());
        signatures.validate()?;

        let retriever = Retriever::new(knowledge);
        let planner = Planner::new(retriever.clone(), Arc::clone(&backend), Arc::clone(&rules), &config);
        let generator = Generator::new(retriever, Arc::clone(&backend), &config);
        let executor = Executor::new(config.executor.clone());
        let mut reviewer = Reviewer::new(Arc::clone(&signatures), &config.review);
        if config.review.use_advisor {
            reviewer = reviewer.with_advisor(backend);
        }

        Ok(Self {
            config,
            rules,
            signatures,
            planner,
            generator,
            executor,
            reviewer,
            registry: CaseRegistry::new(),
        })
    }

    /// Share busy-case tracking with other controllers.
    pub fn with_registry(mut self, registry: CaseRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &CaseRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn rules(&self) -> &DependencyRuleTable {
        &self.rules
    }

    pub fn signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    /// Drive one case from requirement to a terminal state.
    ///
    /// The case lives in `output_dir/<case_name>`. Setting `cancel` to true
    /// aborts a running solver and ends the case as `failed_fatal`.
    pub async fn run(
        &self,
        requirement: &UserRequirement,
        output_dir: &Path,
        cancel: watch::Receiver<bool>,
    ) -> Result<CaseReport> {
        let run = CaseRun::new(self.config.max_iterations);
        let span = tracing::info_span!("foamflow.run", run_id = %run.run_id);
        self.plan_and_drive(requirement, output_dir, run, cancel)
            .instrument(span)
            .await
    }

    async fn plan_and_drive(
        &self,
        requirement: &UserRequirement,
        output_dir: &Path,
        mut run: CaseRun,
        cancel: watch::Receiver<bool>,
    ) -> Result<CaseReport> {
        obs::emit_case_started(
            &run.run_id.to_string(),
            requirement.text().chars().count(),
            self.config.max_iterations,
        );

        let planned = match self.planner.plan(requirement).await {
            Ok(planned) => planned,
            Err(err) => {
                run.fail_fatal(format!("planning failed: {err}"))?;
                return self.finish(run, None, None, &ArtifactStore::new(), None);
            }
        };

        let case_dir = output_dir.join(&planned.plan.case_name);
        let _lease = self.registry.try_acquire(&case_dir)?;
        let case_span = obs::case_span(&planned.plan.case_name);
        self.drive(requirement, run, planned, case_dir, cancel)
            .instrument(case_span)
            .await
    }

    async fn drive(
        &self,
        requirement: &UserRequirement,
        mut run: CaseRun,
        planned: PlannedCase,
        case_dir: PathBuf,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<CaseReport> {
        let PlannedCase {
            mut plan,
            reference,
        } = planned;
        let history = CaseHistory::open(&case_dir)?;
        history.write_reference(&reference)?;
        history.write_plan(&plan)?;
        let mut store = ArtifactStore::new();

        run.advance(
            Stage::Generating,
            Some(format!(
                "{} subtasks from reference {}",
                plan.subtasks.len(),
                reference.id
            )),
        )?;
        let generated = self
            .generator
            .generate_all(requirement, &mut plan, &mut store)
            .await;
        history.write_plan(&plan)?;
        if let Err(err) = generated {
            run.fail_fatal(format!("generation failed: {err}"))?;
            return self.finish(run, Some(&plan), Some(&case_dir), &store, Some(&history));
        }

        let mut patch_note = None;
        loop {
            run.advance(Stage::Executing, patch_note.take())?;
            let iteration = run.state.iteration_count();
            let result = match self
                .executor
                .run(
                    &case_dir,
                    &mut store,
                    requirement.custom_mesh(),
                    iteration,
                    &mut cancel,
                )
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    run.fail_fatal(format!("execution could not start: {err}"))?;
                    break;
                }
            };
            history.append_execution(&result)?;
            run.executions.push(ExecutionSummary::from(&result));

            if result.succeeded() {
                run.advance(Stage::Success, None)?;
                break;
            }
            if result.exit_status == ExitStatus::Cancelled {
                run.fail_fatal("execution cancelled".to_string())?;
                break;
            }

            run.advance(Stage::Reviewing, Some(describe_failure(&result.exit_status, result.logs_complete)))?;
            let diagnosis = self
                .reviewer
                .review(requirement, &result, &plan, &store, &run.diagnoses)
                .await;
            history.append_diagnosis(&diagnosis)?;
            run.diagnoses.push(diagnosis.clone());

            if !run.state.budget_remaining() {
                run.advance(
                    Stage::FailedExhausted,
                    Some(format!(
                        "{} executions failed, last diagnosis {}",
                        run.state.iteration_count(),
                        diagnosis.error_category
                    )),
                )?;
                break;
            }

            run.advance(Stage::Patching, Some(diagnosis.error_category.to_string()))?;
            patch_note = self
                .apply_patch(requirement, &mut plan, &mut store, &diagnosis)
                .await;
            history.archive_revisions(&store)?;
            history.write_plan(&plan)?;
        }

        self.finish(run, Some(&plan), Some(&case_dir), &store, Some(&history))
    }

    /// Insert requested subtasks, then regenerate the implicated artifacts.
    ///
    /// A regeneration failure is not terminal: the next execution runs with
    /// whatever content the store holds and gets reviewed again. The failure
    /// is returned as the reason of that next transition.
    async fn apply_patch(
        &self,
        requirement: &UserRequirement,
        plan: &mut CasePlan,
        store: &mut ArtifactStore,
        diagnosis: &Diagnosis,
    ) -> Option<String> {
        for path in &diagnosis.proposed_patch.insert {
            if plan.contains(&ArtifactId::new(path.clone())) {
                continue;
            }
            let mut subtask = Subtask::new(path.clone());
            subtask.depends_on = self.rules.dependencies_within(subtask.role, &plan.subtasks);
            info!(artifact = %subtask.artifact_id, role = %subtask.role, "subtask inserted");
            plan.subtasks.push(subtask);
        }

        match self
            .generator
            .regenerate(requirement, plan, store, diagnosis)
            .await
        {
            Ok(committed) => {
                info!(regenerated = committed.len(), "patch applied");
                None
            }
            Err(err) => {
                warn!(error = %err, "patch generation failed; re-executing previous artifacts");
                Some(format!("patch not applied: {err}"))
            }
        }
    }

    fn finish(
        &self,
        run: CaseRun,
        plan: Option<&CasePlan>,
        case_dir: Option<&Path>,
        store: &ArtifactStore,
        history: Option<&CaseHistory>,
    ) -> Result<CaseReport> {
        let mut artifacts: Vec<ArtifactSummary> = store
            .iter()
            .map(|a| ArtifactSummary {
                id: a.id.clone(),
                version: a.version,
                digest: a.digest.clone(),
            })
            .collect();
        artifacts.sort_by(|a, b| a.id.cmp(&b.id));

        let report = CaseReport {
            run_id: run.run_id,
            case_name: plan.map(|p| p.case_name.clone()).unwrap_or_default(),
            case_dir: case_dir.map(Path::to_path_buf),
            solver_id: plan.map(|p| p.solver_id.clone()),
            domain_category: plan.map(|p| p.domain_category.clone()),
            terminal_status: run.state.terminal_status(),
            iteration_count: run.state.iteration_count(),
            max_iterations: run.state.max_iterations(),
            fatal_reason: run.fatal_reason,
            executions: run.executions,
            diagnoses: run.diagnoses,
            artifacts,
            transitions: run.state.transitions().to_vec(),
            started_at: run.started_at,
            finished_at: Utc::now(),
        };
        if let Some(history) = history {
            history.write_summary(&report)?;
        }
        obs::emit_case_finished(
            &report.run_id.to_string(),
            report.terminal_status,
            report.iteration_count,
            run.clock.elapsed().as_millis() as u64,
        );
        Ok(report)
    }
}

fn describe_failure(status: &ExitStatus, logs_complete: bool) -> String {
    match status {
        ExitStatus::Exited { code: 0 } if !logs_complete => "solver logs incomplete".to_string(),
        ExitStatus::Exited { code } => format!("exit code {code}"),
        ExitStatus::Signaled => "terminated by signal".to_string(),
        ExitStatus::Timeout => "timed out".to_string(),
        ExitStatus::Cancelled => "cancelled".to_string(),
    }
}
