//! Rendering of structured prompts into chat messages.

use std::fmt::Write as _;

use crate::prompt::{ArtifactRequest, CaseCandidate, DependencyContent, StructuredPrompt};

/// A rendered `(system, user)` message pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

const CLASSIFY_SYSTEM: &str = "You select the OpenFOAM tutorial case that best matches a \
simulation requirement. Answer with a single JSON object with the keys \
\"case_name\", \"domain\", \"category\", \"solver\" and \"reference_id\". \
\"reference_id\" must be one of the listed candidate ids. No prose.";

const ARTIFACT_SYSTEM: &str = "You write one OpenFOAM case file at a time. Answer with a \
single JSON object {\"file_path\": ..., \"content\": ...} where content is the complete \
file text. Keep every boundary name, field name and dimension consistent with the files \
provided as dependencies. Use the values given in the requirement verbatim.";

const ADVICE_SYSTEM: &str = "You diagnose failed OpenFOAM runs. Answer with a single JSON \
object {\"advice\": ...} describing the concrete edits that fix the failure.";

pub fn render(prompt: &StructuredPrompt) -> RenderedPrompt {
    match prompt {
        StructuredPrompt::ClassifyCase {
            requirement,
            candidates,
        } => RenderedPrompt {
            system: CLASSIFY_SYSTEM.to_string(),
            user: render_classify(requirement, candidates),
        },
        StructuredPrompt::GenerateArtifact(req) => RenderedPrompt {
            system: ARTIFACT_SYSTEM.to_string(),
            user: render_artifact(req),
        },
        StructuredPrompt::AdviseRepair {
            requirement,
            category,
            log_excerpt,
            artifacts,
        } => RenderedPrompt {
            system: ADVICE_SYSTEM.to_string(),
            user: render_advice(requirement, category, log_excerpt, artifacts),
        },
    }
}

fn render_classify(requirement: &str, candidates: &[CaseCandidate]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<requirement>{requirement}</requirement>");
    out.push_str("<candidates>\n");
    for c in candidates {
        let _ = writeln!(
            out,
            "id: {} | case: {} | domain: {} | category: {} | solver: {} | score: {:.3}",
            c.reference_id, c.case_name, c.domain, c.category, c.solver, c.score
        );
    }
    out.push_str("</candidates>\n");
    out
}

fn render_files(out: &mut String, tag: &str, files: &[DependencyContent]) {
    for f in files {
        let _ = writeln!(
            out,
            "<{tag} path=\"{}\" role=\"{}\">\n{}\n</{tag}>",
            f.file_path, f.role, f.content
        );
    }
}

fn render_artifact(req: &ArtifactRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<requirement>{}</requirement>", req.requirement);
    let _ = writeln!(
        out,
        "<case name=\"{}\" domain=\"{}\" category=\"{}\" solver=\"{}\"/>",
        req.case.case_name, req.case.domain, req.case.category, req.case.solver
    );
    let _ = writeln!(out, "<plan_files>{}</plan_files>", req.plan_files.join(", "));
    if let Some(mesh) = &req.custom_mesh {
        let _ = writeln!(out, "<custom_mesh>{mesh}</custom_mesh>");
    }
    for r in &req.references {
        let _ = writeln!(
            out,
            "<reference source=\"{}\">\n{}\n</reference>",
            r.source_id, r.content
        );
    }
    render_files(&mut out, "dependency", &req.dependencies);

    if let Some(repair) = &req.repair {
        let _ = writeln!(out, "<repair category=\"{}\">", repair.category);
        let _ = writeln!(out, "<guidance>{}</guidance>", repair.guidance);
        if let Some(advice) = &repair.advice {
            let _ = writeln!(out, "<advice>{advice}</advice>");
        }
        if !repair.previous_categories.is_empty() {
            let _ = writeln!(
                out,
                "<earlier_failures>{}</earlier_failures>",
                repair.previous_categories.join(", ")
            );
        }
        if let Some(previous) = &repair.previous_content {
            let _ = writeln!(out, "<previous_content>\n{previous}\n</previous_content>");
        }
        let _ = writeln!(out, "<failure_log>\n{}\n</failure_log>", repair.failure_log);
        out.push_str("</repair>\n");
    }

    let _ = writeln!(
        out,
        "Write the complete content of {} ({}).",
        req.file_path, req.role
    );
    out
}

fn render_advice(
    requirement: &str,
    category: &str,
    log_excerpt: &str,
    artifacts: &[DependencyContent],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<requirement>{requirement}</requirement>");
    let _ = writeln!(out, "<category>{category}</category>");
    render_files(&mut out, "file", artifacts);
    let _ = writeln!(out, "<log>\n{log_excerpt}\n</log>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{CaseSummary, RepairContext};

    fn request() -> ArtifactRequest {
        ArtifactRequest {
            requirement: "lid-driven cavity, lid velocity 1 m/s".into(),
            case: CaseSummary {
                case_name: "cavity".into(),
                domain: "incompressible".into(),
                category: "laminar".into(),
                solver: "icoFoam".into(),
            },
            file_path: "0/U".into(),
            role: "boundary_conditions".into(),
            plan_files: vec!["system/blockMeshDict".into(), "0/U".into()],
            references: vec![],
            dependencies: vec![DependencyContent {
                file_path: "system/blockMeshDict".into(),
                role: "mesh_definition".into(),
                content: "patches ( wall movingWall );".into(),
            }],
            custom_mesh: None,
            repair: None,
        }
    }

    #[test]
    fn test_artifact_prompt_embeds_dependency_content_verbatim() {
        let rendered = render(&StructuredPrompt::GenerateArtifact(request()));
        assert!(rendered.user.contains("patches ( wall movingWall );"));
        assert!(rendered.user.contains("lid velocity 1 m/s"));
        assert!(!rendered.user.contains("<repair"));
    }

    #[test]
    fn test_repair_section_rendered_when_present() {
        let mut req = request();
        req.repair = Some(RepairContext {
            category: "numerical_divergence".into(),
            failure_log: "Floating point exception".into(),
            guidance: "reduce the time step".into(),
            advice: None,
            previous_categories: vec!["mesh_quality".into()],
            previous_content: None,
        });
        let rendered = render(&StructuredPrompt::GenerateArtifact(req));
        assert!(rendered.user.contains("<repair category=\"numerical_divergence\">"));
        assert!(rendered.user.contains("Floating point exception"));
        assert!(rendered.user.contains("<earlier_failures>mesh_quality</earlier_failures>"));
    }
}
