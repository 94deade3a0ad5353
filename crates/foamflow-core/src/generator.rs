//! Generator: one artifact per subtask, in dependency order.
//!
//! Subtasks run level by level (see [`generation_levels`]). Within a level
//! requests go out concurrently, bounded by a semaphore, and results are
//! committed to the [`ArtifactStore`] in declaration order so that every
//! run over the same plan and backend commits identically.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use foamflow_knowledge::IndexId;
use foamflow_llm::{
    complete_structured, ArtifactRequest, CaseSummary, CompletionBackend, DependencyContent,
    ReferenceText, RepairContext, StructuredPrompt, StructuredResponse,
};

use crate::config::PipelineConfig;
use crate::dependency::{generation_levels, FileRole};
use crate::domain::{
    ArtifactId, ArtifactStore, CasePlan, Diagnosis, FoamError, PutOutcome, Result, Subtask,
    SubtaskStatus, UserRequirement,
};
use crate::obs;
use crate::retrieval::{RetrievalQuery, Retriever};

/// One artifact committed by a generation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArtifact {
    pub id: ArtifactId,
    pub version: u32,
    pub outcome: PutOutcome,
}

pub struct Generator {
    retriever: Retriever,
    backend: Arc<dyn CompletionBackend>,
    attempts: u32,
    workers: usize,
    top_k: usize,
}

impl Generator {
    pub fn new(
        retriever: Retriever,
        backend: Arc<dyn CompletionBackend>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            retriever,
            backend,
            attempts: config.generation_attempts.max(1),
            workers: config.generation_workers.max(1),
            top_k: config.retrieval.top_k,
        }
    }

    /// Generate every subtask that is not yet available.
    #[instrument(skip_all, fields(case_name = %plan.case_name))]
    pub async fn generate_all(
        &self,
        requirement: &UserRequirement,
        plan: &mut CasePlan,
        store: &mut ArtifactStore,
    ) -> Result<Vec<GeneratedArtifact>> {
        let targets: BTreeSet<ArtifactId> = plan
            .subtasks
            .iter()
            .filter(|s| !s.is_available())
            .map(|s| s.artifact_id.clone())
            .collect();
        self.run_pass(requirement, plan, store, &targets, None).await
    }

    /// Regenerate the artifacts a diagnosis implicates, plus any subtask it
    /// asked to insert that is still pending. Everything else is left as is.
    #[instrument(skip_all, fields(case_name = %plan.case_name, category = %diagnosis.error_category))]
    pub async fn regenerate(
        &self,
        requirement: &UserRequirement,
        plan: &mut CasePlan,
        store: &mut ArtifactStore,
        diagnosis: &Diagnosis,
    ) -> Result<Vec<GeneratedArtifact>> {
        let patch = &diagnosis.proposed_patch;
        let mut targets: BTreeSet<ArtifactId> = patch
            .regenerate
            .iter()
            .filter(|id| plan.contains(id))
            .cloned()
            .collect();
        for path in &patch.insert {
            let id = ArtifactId::new(path.clone());
            if plan.subtask(&id).is_some_and(|s| !s.is_available()) {
                targets.insert(id);
            }
        }

        let repair = RepairContext {
            category: diagnosis.error_category.to_string(),
            failure_log: patch.failure_log.clone(),
            guidance: patch.guidance.clone(),
            advice: patch.advice.clone(),
            previous_categories: patch
                .previous_categories
                .iter()
                .map(ToString::to_string)
                .collect(),
            previous_content: None,
        };
        self.run_pass(requirement, plan, store, &targets, Some(&repair))
            .await
    }

    async fn run_pass(
        &self,
        requirement: &UserRequirement,
        plan: &mut CasePlan,
        store: &mut ArtifactStore,
        targets: &BTreeSet<ArtifactId>,
        repair: Option<&RepairContext>,
    ) -> Result<Vec<GeneratedArtifact>> {
        let levels = generation_levels(&plan.subtasks)?;
        let plan_files = plan.file_paths();
        let case = CaseSummary {
            case_name: plan.case_name.clone(),
            domain: plan.domain_category.clone(),
            category: plan.category.clone(),
            solver: plan.solver_id.clone(),
        };
        let custom_mesh = requirement.custom_mesh().map(|m| m.describe());
        let semaphore = Semaphore::new(self.workers);
        let mut committed = Vec::new();

        for level in levels {
            let batch: Vec<usize> = level
                .into_iter()
                .filter(|&i| targets.contains(&plan.subtasks[i].artifact_id))
                .collect();
            if batch.is_empty() {
                continue;
            }

            let mut requests = Vec::with_capacity(batch.len());
            for &i in &batch {
                let subtask = &plan.subtasks[i];
                requests.push(ArtifactRequest {
                    requirement: requirement.text().to_string(),
                    case: case.clone(),
                    file_path: subtask.file_path.clone(),
                    role: subtask.role.to_string(),
                    plan_files: plan_files.clone(),
                    references: Vec::new(),
                    dependencies: dependency_contents(subtask, plan, store)?,
                    custom_mesh: custom_mesh.clone(),
                    repair: repair.map(|r| RepairContext {
                        previous_content: store.content(&subtask.artifact_id).map(str::to_string),
                        ..r.clone()
                    }),
                });
            }
            let roles: Vec<FileRole> = batch.iter().map(|&i| plan.subtasks[i].role).collect();

            let outcomes = join_all(requests.into_iter().zip(roles).map(|(request, role)| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    self.generate_one(request, role).await
                }
            }))
            .await;

            let mut first_error = None;
            for (&i, outcome) in batch.iter().zip(outcomes) {
                let subtask = &mut plan.subtasks[i];
                match outcome {
                    Ok(content) => {
                        let bytes = content.len();
                        let outcome = store.put(&subtask.artifact_id, &subtask.file_path, content);
                        let version = store
                            .get(&subtask.artifact_id)
                            .map(|a| a.version)
                            .unwrap_or(1);
                        subtask.status = if repair.is_some() {
                            SubtaskStatus::Patched
                        } else {
                            SubtaskStatus::Generated
                        };
                        obs::emit_artifact_generated(
                            subtask.artifact_id.as_str(),
                            version,
                            bytes,
                            repair.is_some(),
                        );
                        committed.push(GeneratedArtifact {
                            id: subtask.artifact_id.clone(),
                            version,
                            outcome,
                        });
                    }
                    Err(err) => {
                        if store.get(&subtask.artifact_id).is_none() {
                            subtask.status = SubtaskStatus::Failed;
                        }
                        first_error.get_or_insert(err);
                    }
                }
            }
            // Dependents of a failed level would be generated against missing input.
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        Ok(committed)
    }

    #[instrument(skip(self, request), fields(artifact = %request.file_path))]
    async fn generate_one(&self, mut request: ArtifactRequest, role: FileRole) -> Result<String> {
        request.references = self.references_for(&request, role).await;
        let prompt = StructuredPrompt::GenerateArtifact(request);
        let file_path = prompt.file_path().unwrap_or_default().to_string();

        let mut last_reason = String::new();
        for attempt in 1..=self.attempts {
            match complete_structured(self.backend.as_ref(), &prompt).await {
                Ok(StructuredResponse::Artifact(artifact)) => {
                    debug!(attempt, bytes = artifact.content.len(), "artifact accepted");
                    return Ok(artifact.content);
                }
                Ok(StructuredResponse::Malformed { reason, .. }) => {
                    warn!(attempt, %reason, "malformed artifact response");
                    last_reason = reason;
                }
                Ok(other) => {
                    last_reason = format!("unexpected response {other:?}");
                    warn!(attempt, reason = %last_reason, "unexpected artifact response");
                }
                Err(err) => {
                    warn!(attempt, error = %err, "artifact request failed");
                    last_reason = err.to_string();
                }
            }
        }
        Err(FoamError::GenerationFailed {
            artifact_id: file_path,
            attempts: self.attempts,
            reason: last_reason,
        })
    }

    /// Reference snippets for one file. Missing indices are skipped and a
    /// failing lookup degrades to fewer references.
    async fn references_for(&self, request: &ArtifactRequest, role: FileRole) -> Vec<ReferenceText> {
        let mut queries = vec![RetrievalQuery::new(
            IndexId::FileDetail,
            format!("{} {} {}", request.case.solver, request.case.case_name, request.file_path),
            self.top_k,
        )];
        if role == FileRole::RunControl {
            queries.push(RetrievalQuery::new(
                IndexId::ScriptReference,
                format!("{} {}", request.case.solver, request.case.domain),
                self.top_k,
            ));
            queries.push(RetrievalQuery::new(
                IndexId::CommandReference,
                request.case.solver.clone(),
                self.top_k,
            ));
        }
        queries.retain(|q| self.retriever.has_index(q.index));

        match self.retriever.search_many(&queries).await {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| ReferenceText {
                    source_id: hit.snippet.id,
                    content: hit.snippet.content,
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, "reference lookup failed");
                Vec::new()
            }
        }
    }
}

/// Exact current content of every artifact `subtask` depends on.
fn dependency_contents(
    subtask: &Subtask,
    plan: &CasePlan,
    store: &ArtifactStore,
) -> Result<Vec<DependencyContent>> {
    subtask
        .depends_on
        .iter()
        .map(|dep| {
            let available = plan.subtask(dep).is_some_and(Subtask::is_available);
            match (available, store.get(dep)) {
                (true, Some(artifact)) => Ok(DependencyContent {
                    file_path: artifact.file_path.clone(),
                    role: FileRole::classify(&artifact.file_path).to_string(),
                    content: artifact.content.clone(),
                }),
                _ => Err(FoamError::GenerationFailed {
                    artifact_id: subtask.artifact_id.to_string(),
                    attempts: 0,
                    reason: format!("dependency {dep} is not available"),
                }),
            }
        })
        .collect()
}
