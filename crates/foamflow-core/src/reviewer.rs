//! Reviewer: failed execution to diagnosis.
//!
//! The captured log is matched against an ordered, versioned
//! [`SignatureTable`]. The first rule that matches anywhere in the log
//! decides the category; its evidence is the last matching line, since
//! solver errors sit at the tail. Implicated artifacts come from the file the
//! message names when there is one, otherwise from the rule's file roles.
//!
//! The reviewer never touches the case directory. It only returns a
//! [`Diagnosis`] whose patch the controller may apply.

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use foamflow_llm::{complete_structured, CompletionBackend, DependencyContent, StructuredPrompt, StructuredResponse};

use crate::config::ReviewConfig;
use crate::dependency::{FileRole, MESH_DIRECTORIES};
use crate::domain::{
    ArtifactId, ArtifactStore, CasePlan, Confidence, Diagnosis, ErrorCategory, ExecutionResult,
    ExitStatus, FoamError, ProposedPatch, Result, UserRequirement,
};
use crate::obs;

const TIMEOUT_RULE: &str = "timeout";
const TIMEOUT_GUIDANCE: &str = "The run did not finish within the wall-clock limit. Shorten endTime, \
     enlarge deltaT within the Courant limit, or coarsen the mesh so the case completes in time.";
const UNKNOWN_GUIDANCE: &str = "The failure matched no known signature. Re-check this file against \
     the failure log and the files it depends on.";

/// Top-level case folders used to recover a case-relative path from an
/// absolute one in a solver message.
const CASE_FOLDERS: &[&str] = &["0", "0.orig", "constant", "system"];

/// One error signature.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureRule {
    pub name: String,
    pub pattern: String,
    pub category: ErrorCategory,
    pub implicates: Vec<FileRole>,
    /// Prefer the artifact named by the `file` capture group.
    pub narrow_to_mentioned_file: bool,
    pub confidence: Confidence,
    pub guidance: String,
    #[serde(skip)]
    regex: Option<Regex>,
}

impl SignatureRule {
    pub fn new(
        name: &str,
        pattern: &str,
        category: ErrorCategory,
        implicates: &[FileRole],
        confidence: Confidence,
        guidance: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            category,
            implicates: implicates.to_vec(),
            narrow_to_mentioned_file: false,
            confidence,
            guidance: guidance.to_string(),
            regex: Regex::new(pattern).ok(),
        }
    }

    pub fn narrowed(mut self) -> Self {
        self.narrow_to_mentioned_file = true;
        self
    }

    /// Last match in `log`: (matched line, `file` capture).
    fn last_match<'a>(&self, log: &'a str) -> Option<(&'a str, Option<&'a str>)> {
        let regex = self.regex.as_ref()?;
        let caps = regex.captures_iter(log).last()?;
        let whole = caps.get(0)?;
        let line_start = log[..whole.start()].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = log[whole.end()..]
            .find('\n')
            .map(|i| whole.end() + i)
            .unwrap_or(log.len());
        let file = caps.name("file").map(|m| m.as_str());
        Some((log[line_start..line_end].trim(), file))
    }
}

/// Ordered signature rules; earlier rules win.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureTable {
    pub version: String,
    pub rules: Vec<SignatureRule>,
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl SignatureTable {
    pub fn standard() -> Self {
        use ErrorCategory as C;
        use FileRole as R;
        Self {
            version: "v1".to_string(),
            rules: vec![
                SignatureRule::new(
                    "command_not_found",
                    r"(?m)(?:command not found|: not found$|Unknown application)",
                    C::CommandNotFound,
                    &[R::RunControl],
                    Confidence::High,
                    "The run script calls a command that does not exist. Use only solvers and \
                     utilities shipped with the installed OpenFOAM version.",
                ),
                SignatureRule::new(
                    "missing_mesh",
                    r#"cannot (?:find|open) file\s*"?[^"\s]*constant/(?:polyMesh|triSurface|geometry)/"#,
                    C::MissingFile,
                    &[R::MeshDefinition, R::RunControl],
                    Confidence::High,
                    "The mesh was not written before the solver started. Make the mesh \
                     definition valid and have the run script call the meshing utility first.",
                ),
                SignatureRule::new(
                    "missing_file",
                    r#"cannot (?:find|open) file\s*"?(?P<file>[^"\s]+)"?"#,
                    C::MissingFile,
                    &[R::BoundaryConditions],
                    Confidence::High,
                    "A file the solver needs is missing or unreadable. Provide it with the \
                     entries the solver expects.",
                )
                .narrowed(),
                SignatureRule::new(
                    "undefined_keyword",
                    r#"keyword (?P<keyword>\S+) is undefined in dictionary\s*"?(?P<file>[^"\s]+)"?"#,
                    C::UndefinedKeyword,
                    &[R::SolverControl],
                    Confidence::High,
                    "A required keyword is missing from a dictionary. Add it with a value \
                     valid for this solver.",
                )
                .narrowed(),
                SignatureRule::new(
                    "patch_mismatch",
                    r"(?i)(?:cannot find patchField entry for \S+|patch \S+ not found|not constraint type|inconsistent patch)",
                    C::PatchMismatch,
                    &[R::BoundaryConditions, R::MeshDefinition],
                    Confidence::High,
                    "Boundary patches in the fields do not match the mesh. Every patch in the \
                     mesh needs an entry in each field with a compatible type.",
                ),
                SignatureRule::new(
                    "dimension_mismatch",
                    r"(?i)(?:dimensions of .* (?:do not match|are not consistent)|incompatible dimensions|inconsistent dimensions)",
                    C::DimensionMismatch,
                    &[R::BoundaryConditions, R::PhysicalProperties],
                    Confidence::High,
                    "Dimension sets disagree. Check the [kg m s K mol A cd] dimensions of \
                     fields and physical properties.",
                ),
                SignatureRule::new(
                    "mesh_quality",
                    r"(?i)(?:Failed \d+ mesh checks|negative (?:cell )?volume|zero or negative (?:cell volume|face area)|wrong[- ]oriented faces|incorrectly oriented)",
                    C::MeshQuality,
                    &[R::MeshDefinition],
                    Confidence::High,
                    "The mesh failed quality checks. Fix vertex ordering, grading and cell \
                     counts in the mesh definition.",
                ),
                SignatureRule::new(
                    "numerical_divergence",
                    r"(?:Floating point exception|sigFpe|\bnan\b|\bNaN\b|(?i:maximum number of iterations exceeded)|(?i:solution singularity))",
                    C::NumericalDivergence,
                    &[R::SolverControl, R::BoundaryConditions],
                    Confidence::Medium,
                    "The solution diverged. Reduce the time step, use more robust schemes \
                     and relaxation, and check boundary values for consistency.",
                ),
            ],
        }
    }

    /// Every pattern compiles and every rule has a name.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(FoamError::InvalidConfig(
                    "signature rule without a name".to_string(),
                ));
            }
            if rule.regex.is_none() {
                return Err(FoamError::InvalidConfig(format!(
                    "signature rule {} has an invalid pattern: {}",
                    rule.name, rule.pattern
                )));
            }
        }
        Ok(())
    }

    /// First rule matching `log`, with its evidence line and file capture.
    pub fn classify<'t, 'l>(
        &'t self,
        log: &'l str,
    ) -> Option<(&'t SignatureRule, &'l str, Option<&'l str>)> {
        self.rules
            .iter()
            .find_map(|rule| rule.last_match(log).map(|(line, file)| (rule, line, file)))
    }
}

pub struct Reviewer {
    table: Arc<SignatureTable>,
    advisor: Option<Arc<dyn CompletionBackend>>,
    log_tail_lines: usize,
}

impl Reviewer {
    pub fn new(table: Arc<SignatureTable>, config: &ReviewConfig) -> Self {
        Self {
            table,
            advisor: None,
            log_tail_lines: config.log_tail_lines,
        }
    }

    /// Ask `backend` for free-text advice on every diagnosis.
    pub fn with_advisor(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.advisor = Some(backend);
        self
    }

    pub fn table(&self) -> &SignatureTable {
        &self.table
    }

    /// Diagnose `result`, then attach advice when an advisor is configured.
    #[instrument(skip_all, fields(iteration = result.iteration))]
    pub async fn review(
        &self,
        requirement: &UserRequirement,
        result: &ExecutionResult,
        plan: &CasePlan,
        store: &ArtifactStore,
        earlier: &[Diagnosis],
    ) -> Diagnosis {
        let mut diagnosis = self.diagnose(result, plan, store, earlier);
        if let Some(advisor) = &self.advisor {
            diagnosis.proposed_patch.advice =
                self.advice(advisor.as_ref(), requirement, &diagnosis, store).await;
        }
        obs::emit_diagnosis(
            diagnosis.iteration,
            diagnosis.error_category,
            diagnosis.confidence,
            diagnosis.implicated_artifact_ids.len(),
        );
        diagnosis
    }

    /// Signature matching only.
    pub fn diagnose(
        &self,
        result: &ExecutionResult,
        plan: &CasePlan,
        store: &ArtifactStore,
        earlier: &[Diagnosis],
    ) -> Diagnosis {
        let failure_log = result.log_tail(self.log_tail_lines);
        let previous_categories = earlier.iter().map(|d| d.error_category).collect();

        let (category, confidence, guidance, matched_rule, evidence, mut implicated, insert) =
            if result.exit_status == ExitStatus::Timeout {
                (
                    ErrorCategory::Timeout,
                    Confidence::Medium,
                    TIMEOUT_GUIDANCE.to_string(),
                    Some(TIMEOUT_RULE.to_string()),
                    None,
                    plan.artifacts_with_roles(&[FileRole::SolverControl]),
                    Vec::new(),
                )
            } else if let Some((rule, line, file)) = self.table.classify(&result.captured_log) {
                let (implicated, insert) = match file.filter(|_| rule.narrow_to_mentioned_file) {
                    Some(mentioned) => resolve_mentioned(mentioned, plan),
                    None => (Vec::new(), Vec::new()),
                };
                let implicated = if implicated.is_empty() && insert.is_empty() {
                    plan.artifacts_with_roles(&rule.implicates)
                } else {
                    implicated
                };
                (
                    rule.category,
                    rule.confidence,
                    rule.guidance.clone(),
                    Some(rule.name.clone()),
                    Some(line.to_string()),
                    implicated,
                    insert,
                )
            } else {
                (
                    ErrorCategory::Unknown,
                    Confidence::Low,
                    UNKNOWN_GUIDANCE.to_string(),
                    None,
                    None,
                    Vec::new(),
                    Vec::new(),
                )
            };

        let mut confidence = confidence;
        if implicated.is_empty() && insert.is_empty() {
            if let Some(latest) = store.most_recently_modified() {
                debug!(artifact = %latest.id, "falling back to most recently modified artifact");
                implicated.push(latest.id.clone());
            }
            confidence = Confidence::Low;
        }

        Diagnosis {
            iteration: result.iteration,
            error_category: category,
            implicated_artifact_ids: implicated.clone(),
            proposed_patch: ProposedPatch {
                regenerate: implicated,
                insert,
                failure_log,
                guidance,
                advice: None,
                previous_categories,
            },
            confidence,
            matched_rule,
            evidence,
        }
    }

    async fn advice(
        &self,
        advisor: &dyn CompletionBackend,
        requirement: &UserRequirement,
        diagnosis: &Diagnosis,
        store: &ArtifactStore,
    ) -> Option<String> {
        let artifacts = diagnosis
            .implicated_artifact_ids
            .iter()
            .filter_map(|id| store.get(id))
            .map(|a| DependencyContent {
                file_path: a.file_path.clone(),
                role: FileRole::classify(&a.file_path).to_string(),
                content: a.content.clone(),
            })
            .collect();
        let prompt = StructuredPrompt::AdviseRepair {
            requirement: requirement.text().to_string(),
            category: diagnosis.error_category.to_string(),
            log_excerpt: diagnosis.proposed_patch.failure_log.clone(),
            artifacts,
        };
        match complete_structured(advisor, &prompt).await {
            Ok(StructuredResponse::Advice(advice)) => Some(advice.advice),
            Ok(other) => {
                warn!(response = ?other, "advisor response ignored");
                None
            }
            Err(err) => {
                warn!(error = %err, "advisor request failed");
                None
            }
        }
    }
}

/// Map a path from a solver message to plan artifacts.
///
/// Returns the matching artifact, or a case-relative path to insert when
/// the plan has no such file.
fn resolve_mentioned(mentioned: &str, plan: &CasePlan) -> (Vec<ArtifactId>, Vec<String>) {
    let mentioned = mentioned.trim_end_matches(['.', ',', ':', ';']);
    let best = plan
        .subtasks
        .iter()
        .filter(|s| {
            mentioned == s.file_path
                || mentioned.ends_with(&format!("/{}", s.file_path))
                || mentioned.contains(&format!("/{}/", s.file_path))
                || mentioned.starts_with(&format!("{}/", s.file_path))
        })
        .max_by_key(|s| s.file_path.len());
    if let Some(subtask) = best {
        return (vec![subtask.artifact_id.clone()], Vec::new());
    }
    match case_relative(mentioned) {
        Some(relative) => (Vec::new(), vec![relative]),
        None => (Vec::new(), Vec::new()),
    }
}

fn case_relative(mentioned: &str) -> Option<String> {
    let segments: Vec<&str> = mentioned.split('/').filter(|s| !s.is_empty()).collect();
    let start = segments
        .iter()
        .rposition(|s| CASE_FOLDERS.contains(s))?;
    // folder plus file name; deeper segments are sub-dictionaries
    let file = segments.get(start + 1)?;
    let relative = format!("{}/{}", segments[start], file);
    if MESH_DIRECTORIES.contains(&relative.as_str()) {
        return None;
    }
    Some(relative)
}
