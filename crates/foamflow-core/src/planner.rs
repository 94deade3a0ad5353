//! Planner: requirement to case plan.
//!
//! 1. retrieve analogous reference cases from the `case_structure` index
//! 2. let the completion backend pick one of them (classification)
//! 3. take the file set from that reference case's directory structure
//! 4. assign dependency edges from the rule table
//!
//! Planning failures are reported, never retried.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use foamflow_knowledge::{parse_directory_structure, DirectoryEntry, IndexId, ScoredSnippet, Snippet};
use foamflow_llm::{complete_structured, CaseCandidate, CompletionBackend, StructuredPrompt, StructuredResponse};

use crate::config::PipelineConfig;
use crate::dependency::{generation_levels, DependencyRuleTable, FileRole};
use crate::domain::{CasePlan, FoamError, Result, Subtask, UserRequirement};
use crate::retrieval::Retriever;

/// Folders listed first in a plan, in this order.
const FOLDER_PRIORITY: &[&str] = &["system", "constant", "0"];

const STRUCTURE_OPEN: &str = "<directory_structure>";
const STRUCTURE_CLOSE: &str = "</directory_structure>";

/// The reference case a plan was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceCase {
    pub id: String,
    pub case_name: String,
    pub score: f32,
    pub structure: Vec<DirectoryEntry>,
    /// Raw text of the retrieved snippet.
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct PlannedCase {
    pub plan: CasePlan,
    pub reference: ReferenceCase,
}

pub struct Planner {
    retriever: Retriever,
    backend: Arc<dyn CompletionBackend>,
    rules: Arc<DependencyRuleTable>,
    top_k: usize,
    min_relevance: f32,
    run_script: String,
}

impl Planner {
    pub fn new(
        retriever: Retriever,
        backend: Arc<dyn CompletionBackend>,
        rules: Arc<DependencyRuleTable>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            retriever,
            backend,
            rules,
            top_k: config.retrieval.top_k,
            min_relevance: config.retrieval.min_relevance,
            run_script: config.executor.run_script.clone(),
        }
    }

    #[instrument(skip_all)]
    pub async fn plan(&self, requirement: &UserRequirement) -> Result<PlannedCase> {
        let hits = self
            .retriever
            .search(IndexId::CaseStructure, requirement.text(), self.top_k)
            .await?;
        let best = hits.first().map(|h| h.score).unwrap_or(0.0);
        let candidates: Vec<&ScoredSnippet> = hits
            .iter()
            .filter(|h| h.score >= self.min_relevance && h.score > 0.0)
            .collect();
        if candidates.is_empty() {
            return Err(FoamError::PlanningFailed {
                reason: format!(
                    "no reference case above relevance {:.3} (best {:.3})",
                    self.min_relevance, best
                ),
            });
        }

        let prompt = StructuredPrompt::ClassifyCase {
            requirement: requirement.text().to_string(),
            candidates: candidates.iter().map(|h| candidate(h)).collect(),
        };
        let response = complete_structured(self.backend.as_ref(), &prompt)
            .await
            .map_err(|e| FoamError::PlanningFailed {
                reason: format!("classification request failed: {e}"),
            })?;
        let classification = match response {
            StructuredResponse::Classification(c) => c,
            StructuredResponse::Malformed { reason, .. } => {
                return Err(FoamError::PlanningFailed {
                    reason: format!("malformed classification: {reason}"),
                })
            }
            other => {
                return Err(FoamError::PlanningFailed {
                    reason: format!("unexpected classification response: {other:?}"),
                })
            }
        };

        let chosen = candidates
            .iter()
            .find(|h| h.snippet.id == classification.reference_id)
            .ok_or_else(|| FoamError::PlanningFailed {
                reason: format!(
                    "classified reference {} is not a retrieved candidate",
                    classification.reference_id
                ),
            })?;

        let structure = parse_directory_structure(structure_text(&chosen.snippet));
        if structure.is_empty() {
            return Err(FoamError::PlanningFailed {
                reason: format!(
                    "reference case {} has no parsable directory structure",
                    chosen.snippet.id
                ),
            });
        }

        let custom_mesh = requirement.custom_mesh().is_some();
        let mut subtasks = Vec::new();
        let mut seen = HashSet::new();
        for path in ordered_file_paths(&structure) {
            if !seen.insert(path.clone()) {
                continue;
            }
            let subtask = Subtask::new(path);
            if custom_mesh && subtask.role == FileRole::MeshDefinition {
                continue;
            }
            subtasks.push(subtask);
        }
        if !seen.contains(&self.run_script) {
            subtasks.push(Subtask::new(self.run_script.clone()));
        }

        self.rules.assign(&mut subtasks);
        generation_levels(&subtasks)?;

        let reference_name = meta_or(&chosen.snippet, "case_name", &last_segment(&chosen.snippet.id));
        let plan = CasePlan {
            case_name: sanitize_case_name(&classification.case_name, &reference_name),
            solver_id: classification.solver,
            domain_category: classification.domain,
            category: classification.category,
            reference_id: chosen.snippet.id.clone(),
            subtasks,
        };
        if plan.solver_id.trim().is_empty() {
            warn!(reference = %plan.reference_id, "classification carries no solver");
        }
        info!(
            case_name = %plan.case_name,
            solver = %plan.solver_id,
            reference = %plan.reference_id,
            subtasks = plan.subtasks.len(),
            "case planned"
        );

        Ok(PlannedCase {
            reference: ReferenceCase {
                id: chosen.snippet.id.clone(),
                case_name: reference_name,
                score: chosen.score,
                structure,
                content: chosen.snippet.content.clone(),
            },
            plan,
        })
    }
}

fn meta_or(snippet: &Snippet, key: &str, fallback: &str) -> String {
    let value = snippet.meta(key);
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn last_segment(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}

fn candidate(hit: &ScoredSnippet) -> CaseCandidate {
    let s = &hit.snippet;
    CaseCandidate {
        reference_id: s.id.clone(),
        case_name: meta_or(s, "case_name", &last_segment(&s.id)),
        domain: s.meta("case_domain").to_string(),
        category: s.meta("case_category").to_string(),
        solver: s.meta("case_solver").to_string(),
        score: hit.score,
    }
}

/// `dir_structure` metadata, else the `<directory_structure>` block, else the whole content.
fn structure_text(snippet: &Snippet) -> &str {
    let meta = snippet.meta("dir_structure");
    if !meta.is_empty() {
        return meta;
    }
    let content = snippet.content.as_str();
    if let (Some(start), Some(end)) = (content.find(STRUCTURE_OPEN), content.find(STRUCTURE_CLOSE)) {
        if end > start {
            return &content[start..end + STRUCTURE_CLOSE.len()];
        }
    }
    content
}

fn ordered_file_paths(entries: &[DirectoryEntry]) -> Vec<String> {
    let mut ordered: Vec<&DirectoryEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| {
        FOLDER_PRIORITY
            .iter()
            .position(|f| *f == e.folder)
            .unwrap_or(FOLDER_PRIORITY.len())
    });
    ordered.iter().flat_map(|e| e.file_paths()).collect()
}

/// Case names become directory names: whitespace to `_`, nothing but
/// alphanumerics, `_`, `-` and `.` kept, no leading dot.
pub fn sanitize_case_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() && name != fallback {
        return sanitize_case_name(fallback, "case");
    }
    if cleaned.is_empty() {
        return "case".to_string();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_case_name() {
        assert_eq!(sanitize_case_name("lid driven cavity", "x"), "lid_driven_cavity");
        assert_eq!(sanitize_case_name("../etc/passwd", "x"), "etcpasswd");
        assert_eq!(sanitize_case_name("  ", "cavity"), "cavity");
        assert_eq!(sanitize_case_name("", ""), "case");
    }

    #[test]
    fn test_ordered_file_paths_by_folder_priority() {
        let entries = parse_directory_structure(
            "<dir>directory name: 0. File names in this directory: [U, p]</dir>\
             <dir>directory name: constant. File names in this directory: [transportProperties]</dir>\
             <dir>directory name: system. File names in this directory: [controlDict]</dir>",
        );
        assert_eq!(
            ordered_file_paths(&entries),
            vec!["system/controlDict", "constant/transportProperties", "0/U", "0/p"]
        );
    }

    #[test]
    fn test_structure_text_prefers_metadata() {
        let snippet = Snippet::new("a", IndexId::CaseStructure, "case name: a")
            .with_metadata("dir_structure", "<dir>directory name: 0. File names in this directory: [T]</dir>");
        assert!(structure_text(&snippet).starts_with("<dir>"));

        let inline = Snippet::new(
            "b",
            IndexId::CaseStructure,
            "case name: b\n<directory_structure><dir>directory name: 0. File names in this directory: [T]</dir></directory_structure>",
        );
        assert!(structure_text(&inline).starts_with(STRUCTURE_OPEN));
    }
}
