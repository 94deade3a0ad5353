//! Shared fixtures: a small tutorial knowledge base and scripted backends.

#![allow(dead_code)]

use std::sync::Arc;

use foamflow_core::PipelineConfig;
use foamflow_knowledge::{IndexId, KnowledgeStore, MemoryKnowledgeStore, Snippet};
use foamflow_llm::fakes::ScriptedBackend;
use foamflow_llm::{ArtifactRequest, StructuredPrompt};

pub const CAVITY: &str = "incompressible/icoFoam/cavity/cavity";
pub const DAM_BREAK: &str = "multiphase/interFoam/laminar/damBreak";
pub const CHANNEL: &str = "incompressible/pimpleFoam/laminar/channelProbe";

pub const CAVITY_REQUIREMENT: &str = "Simulate a 2D lid-driven cavity flow with icoFoam on a \
     64x64 grid. Kinematic viscosity nu = 1e-3, top lid moving at 1 m/s, deltaT 0.005 s, \
     end time 20 s.";

pub const CHANNEL_REQUIREMENT: &str = "Laminar channel probe with pimpleFoam, a setFields \
     initialised velocity patch and an inlet at 10 m/s.";

fn case_snippet(id: &str, solver: &str, domain: &str, category: &str, text: &str, dirs: &str) -> Snippet {
    let name = id.rsplit('/').next().unwrap_or(id);
    Snippet::new(id, IndexId::CaseStructure, text)
        .with_metadata("case_name", name)
        .with_metadata("case_domain", domain)
        .with_metadata("case_category", category)
        .with_metadata("case_solver", solver)
        .with_metadata("dir_structure", dirs)
}

/// Three tutorial cases and a handful of file snippets.
pub fn knowledge() -> Arc<MemoryKnowledgeStore> {
    let structures = vec![
        case_snippet(
            CAVITY,
            "icoFoam",
            "incompressible",
            "laminar",
            "lid driven cavity flow, icoFoam, incompressible laminar, moving lid, grid",
            "<dir>directory name: system. File names in this directory: [blockMeshDict, controlDict, fvSchemes, fvSolution]</dir>\
             <dir>directory name: constant. File names in this directory: [transportProperties]</dir>\
             <dir>directory name: 0. File names in this directory: [U, p]</dir>",
        ),
        case_snippet(
            DAM_BREAK,
            "interFoam",
            "multiphase",
            "laminar",
            "dam break, interFoam, multiphase water column collapse, setFields",
            "<dir>directory name: system. File names in this directory: [blockMeshDict, setFieldsDict, controlDict, fvSchemes, fvSolution]</dir>\
             <dir>directory name: constant. File names in this directory: [transportProperties, g]</dir>\
             <dir>directory name: 0. File names in this directory: [U, p_rgh, alpha.water]</dir>",
        ),
        case_snippet(
            CHANNEL,
            "pimpleFoam",
            "incompressible",
            "laminar",
            "laminar channel probe, pimpleFoam, setFields initialised velocity, inlet",
            "<dir>directory name: system. File names in this directory: [blockMeshDict, setFieldsDict, fvSolution]</dir>\
             <dir>directory name: constant. File names in this directory: [transportProperties]</dir>\
             <dir>directory name: 0. File names in this directory: [U]</dir>",
        ),
    ];

    let details = vec![
        Snippet::new(
            "cavity/system/blockMeshDict",
            IndexId::FileDetail,
            "icoFoam cavity system/blockMeshDict blocks ( hex (0 1 2 3 4 5 6 7) (20 20 1) simpleGrading (1 1 1) );",
        ),
        Snippet::new(
            "cavity/0/U",
            IndexId::FileDetail,
            "icoFoam cavity 0/U movingWall { type fixedValue; value uniform (1 0 0); }",
        ),
    ];

    let scripts = vec![Snippet::new(
        "cavity/Allrun",
        IndexId::ScriptReference,
        "#!/bin/sh\nrunApplication blockMesh\nrunApplication icoFoam",
    )];

    Arc::new(
        MemoryKnowledgeStore::new()
            .with_index(IndexId::CaseStructure, structures)
            .with_index(IndexId::FileDetail, details)
            .with_index(IndexId::ScriptReference, scripts),
    )
}

pub fn knowledge_store() -> Arc<dyn KnowledgeStore> {
    knowledge()
}

/// Test config: every candidate visible, short solver timeout.
pub fn config(max_iterations: u32) -> PipelineConfig {
    let mut config = PipelineConfig {
        max_iterations,
        ..PipelineConfig::default()
    };
    config.retrieval.top_k = 3;
    config.retrieval.min_relevance = 0.01;
    config.executor.timeout_secs = 30;
    config
}

/// Backend that classifies into `reference_id` and answers artifact prompts
/// with `artifact`.
pub fn backend<F>(reference_id: &'static str, artifact: F) -> Arc<ScriptedBackend>
where
    F: Fn(&ArtifactRequest) -> String + Send + Sync + 'static,
{
    Arc::new(ScriptedBackend::new(move |prompt| match prompt {
        StructuredPrompt::ClassifyCase { candidates, .. } => {
            let chosen = candidates.iter().find(|c| c.reference_id == reference_id);
            let (domain, category, solver) = chosen
                .map(|c| (c.domain.clone(), c.category.clone(), c.solver.clone()))
                .unwrap_or_default();
            Ok(serde_json::json!({
                "reference_id": reference_id,
                "case_name": reference_id.rsplit('/').next().unwrap_or(reference_id),
                "domain": domain,
                "category": category,
                "solver": solver,
            })
            .to_string())
        }
        StructuredPrompt::GenerateArtifact(request) => Ok(artifact(request)),
        StructuredPrompt::AdviseRepair { .. } => {
            Ok(r#"{"advice": "reduce the time step"}"#.to_string())
        }
    }))
}

/// Plain dictionary body for files a scenario does not care about.
pub fn generic_file(path: &str) -> String {
    format!("FoamFile {{ version 2.0; format ascii; object {path}; }}\n// generated")
}

/// Run script that writes a complete solver log and exits 0.
pub const ALLRUN_OK: &str = "#!/bin/bash\nprintf 'Time = 20\\n\\nEnd\\n' > log.icoFoam\nexit 0";

/// Run script that always fails with a divergence signature.
pub const ALLRUN_DIVERGES: &str =
    "#!/bin/bash\necho 'Floating point exception (core dumped)' > log.pimpleFoam\nexit 136";

pub const ALLRUN_SLEEPS: &str = "#!/bin/bash\nsleep 30\nexit 0";

/// Cavity contents honouring every number in [`CAVITY_REQUIREMENT`].
pub fn cavity_file(request: &ArtifactRequest) -> String {
    match request.file_path.as_str() {
        "system/blockMeshDict" => {
            "blocks ( hex (0 1 2 3 4 5 6 7) (64 64 1) simpleGrading (1 1 1) );".to_string()
        }
        "constant/transportProperties" => "nu [0 2 -1 0 0 0 0] 1e-3;".to_string(),
        "0/U" => "boundaryField { movingWall { type fixedValue; value uniform (1 0 0); } }"
            .to_string(),
        "system/controlDict" => "application icoFoam; deltaT 0.005; endTime 20;".to_string(),
        "Allrun" => ALLRUN_OK.to_string(),
        other => generic_file(other),
    }
}

pub fn requirement(text: &str) -> foamflow_core::UserRequirement {
    foamflow_core::UserRequirement::new(text).unwrap()
}
