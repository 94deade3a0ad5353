//! End-to-end case runs against a scripted backend and real `bash` solvers.

mod common;

use tokio::sync::watch;

use common::*;
use foamflow_core::{
    read_summary, ArtifactId, CaseHistory, ErrorCategory, ExitStatus, LoopController, Stage,
    TerminalStatus,
};
use foamflow_llm::{ArtifactRequest, StructuredPrompt};

const CHANNEL_ALLRUN: &str = "#!/bin/bash\n\
if grep -q robust system/fvSolution; then\n\
  printf 'Time = 1\\n\\nEnd\\n' > log.pimpleFoam\n\
  exit 0\n\
fi\n\
echo 'Floating point exception (core dumped)' > log.pimpleFoam\n\
exit 136";

const FV_SOLUTION_FIRST: &str = "PIMPLE { nOuterCorrectors 1; }";
const FV_SOLUTION_REPAIRED: &str = "PIMPLE { nOuterCorrectors 50; } // robust";

/// Diverges until fvSolution has been repaired.
fn channel_file(request: &ArtifactRequest) -> String {
    let repaired = request.repair.is_some();
    match request.file_path.as_str() {
        "system/fvSolution" if repaired => FV_SOLUTION_REPAIRED.to_string(),
        "system/fvSolution" => FV_SOLUTION_FIRST.to_string(),
        "0/U" if repaired => "internalField uniform (10 0 0); // relaxed inlet".to_string(),
        "0/U" => "internalField uniform (10 0 0);".to_string(),
        "Allrun" => CHANNEL_ALLRUN.to_string(),
        other => generic_file(other),
    }
}

fn idle() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[tokio::test]
async fn cavity_case_succeeds_first_time_with_requirement_values() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend(CAVITY, cavity_file);
    let controller =
        LoopController::new(config(5), knowledge_store(), backend.clone()).unwrap();
    let (_tx, rx) = idle();

    let report = controller
        .run(&requirement(CAVITY_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::Success);
    assert_eq!(report.iteration_count, 1);
    assert_eq!(report.solver_id.as_deref(), Some("icoFoam"));
    assert!(report.diagnoses.is_empty());

    let case_dir = out.path().join("cavity");
    assert_eq!(report.case_dir.as_deref(), Some(case_dir.as_path()));
    let nu = std::fs::read_to_string(case_dir.join("constant/transportProperties")).unwrap();
    assert!(nu.contains("1e-3"));
    let u = std::fs::read_to_string(case_dir.join("0/U")).unwrap();
    assert!(u.contains("uniform (1 0 0)"));
    assert!(case_dir.join("reference_case.txt").exists());
    assert!(case_dir.join("log.icoFoam").exists());

    // Fields were generated with the mesh and properties they depend on.
    let u_prompts = backend.artifact_prompts("0/U");
    assert_eq!(u_prompts.len(), 1);
    let StructuredPrompt::GenerateArtifact(request) = &u_prompts[0] else {
        panic!("expected an artifact prompt");
    };
    let mesh = request
        .dependencies
        .iter()
        .find(|d| d.file_path == "system/blockMeshDict")
        .expect("0/U depends on the mesh");
    assert!(mesh.content.contains("(64 64 1)"));

    let summary = read_summary(&case_dir).unwrap();
    assert_eq!(summary, report);
}

#[tokio::test]
async fn divergence_is_repaired_by_regenerating_only_implicated_files() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend(CHANNEL, channel_file);
    let controller =
        LoopController::new(config(5), knowledge_store(), backend.clone()).unwrap();
    let (_tx, rx) = idle();

    let report = controller
        .run(&requirement(CHANNEL_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::Success);
    assert_eq!(report.iteration_count, 2);
    assert_eq!(report.diagnoses.len(), 1);

    let diagnosis = &report.diagnoses[0];
    assert_eq!(diagnosis.error_category, ErrorCategory::NumericalDivergence);
    let mut implicated: Vec<&str> = diagnosis
        .implicated_artifact_ids
        .iter()
        .map(ArtifactId::as_str)
        .collect();
    implicated.sort();
    assert_eq!(implicated, vec!["0/U", "system/fvSolution"]);

    for untouched in ["system/blockMeshDict", "system/setFieldsDict", "Allrun"] {
        assert_eq!(backend.artifact_prompts(untouched).len(), 1, "{untouched}");
    }
    for repaired in ["system/fvSolution", "0/U"] {
        let prompts = backend.artifact_prompts(repaired);
        assert_eq!(prompts.len(), 2, "{repaired}");
        let repair = prompts[1].repair().expect("second prompt carries repair context");
        assert_eq!(repair.category, "numerical_divergence");
        assert!(repair.failure_log.contains("Floating point exception"));
        assert!(repair.previous_content.is_some());
    }

    let case_dir = out.path().join("channelProbe");
    assert_eq!(
        std::fs::read_to_string(case_dir.join("system/blockMeshDict")).unwrap(),
        generic_file("system/blockMeshDict")
    );
    assert_eq!(
        std::fs::read_to_string(case_dir.join("system/fvSolution")).unwrap(),
        FV_SOLUTION_REPAIRED
    );

    // Second execution only rewrote the patched files.
    let touched: Vec<&str> = report.executions[1]
        .artifacts_touched
        .iter()
        .map(ArtifactId::as_str)
        .collect();
    assert_eq!(touched, vec!["0/U", "system/fvSolution"]);
    assert_eq!(report.executions[0].artifacts_touched.len(), 6);

    let history = CaseHistory::open(&case_dir).unwrap();
    assert_eq!(
        std::fs::read_to_string(history.revision_path("system/fvSolution", 1)).unwrap(),
        FV_SOLUTION_FIRST
    );
    assert!(!history.revision_path("system/blockMeshDict", 1).exists());
    assert_eq!(history.executions().unwrap().len(), 2);
    assert_eq!(history.diagnoses().unwrap().len(), 1);

    let versions: Vec<(&str, u32)> = report
        .artifacts
        .iter()
        .map(|a| (a.id.as_str(), a.version))
        .collect();
    assert!(versions.contains(&("system/fvSolution", 2)));
    assert!(versions.contains(&("system/blockMeshDict", 1)));
}

/// Fails until a pressure field exists; the channel reference has none.
const ALLRUN_NEEDS_P: &str = "#!/bin/bash\n\
if [ ! -f 0/p ]; then\n\
  echo \"--> FOAM FATAL ERROR: cannot find file \\\"$PWD/0/p\\\"\" > log.pimpleFoam\n\
  exit 1\n\
fi\n\
printf 'Time = 1\\n\\nEnd\\n' > log.pimpleFoam\n\
exit 0";

#[tokio::test]
async fn missing_field_is_inserted_generated_and_run() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend(CHANNEL, |request| match request.file_path.as_str() {
        "0/p" => "internalField uniform 0;".to_string(),
        "Allrun" => ALLRUN_NEEDS_P.to_string(),
        other => generic_file(other),
    });
    let controller =
        LoopController::new(config(3), knowledge_store(), backend.clone()).unwrap();
    let (_tx, rx) = idle();

    let report = controller
        .run(&requirement(CHANNEL_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::Success);
    assert_eq!(report.iteration_count, 2);
    let diagnosis = &report.diagnoses[0];
    assert_eq!(diagnosis.error_category, ErrorCategory::MissingFile);
    assert_eq!(diagnosis.proposed_patch.insert, vec!["0/p".to_string()]);

    // Only the inserted field was written before the second run.
    assert_eq!(
        report.executions[1].artifacts_touched,
        vec![ArtifactId::from("0/p")]
    );
    let case_dir = out.path().join("channelProbe");
    assert_eq!(
        std::fs::read_to_string(case_dir.join("0/p")).unwrap(),
        "internalField uniform 0;"
    );

    let prompts = backend.artifact_prompts("0/p");
    assert_eq!(prompts.len(), 1);
    let StructuredPrompt::GenerateArtifact(request) = &prompts[0] else {
        panic!("expected an artifact prompt");
    };
    let mut dependencies: Vec<&str> = request
        .dependencies
        .iter()
        .map(|d| d.file_path.as_str())
        .collect();
    dependencies.sort();
    assert_eq!(
        dependencies,
        vec!["constant/transportProperties", "system/blockMeshDict"]
    );
    assert_eq!(
        request.repair.as_ref().map(|r| r.category.as_str()),
        Some("missing_file")
    );
    for untouched in ["0/U", "system/fvSolution", "Allrun"] {
        assert_eq!(backend.artifact_prompts(untouched).len(), 1, "{untouched}");
    }
}

#[tokio::test]
async fn missing_mesh_is_reviewed_not_fatal() {
    let out = tempfile::tempdir().unwrap();
    let allrun = "#!/bin/bash\n\
mkdir -p constant/polyMesh\n\
echo \"cannot find file \\\"$PWD/constant/polyMesh/points\\\"\" > log.icoFoam\n\
exit 1";
    let backend = backend(CAVITY, move |request| match request.file_path.as_str() {
        "Allrun" => allrun.to_string(),
        _ => cavity_file(request),
    });
    let controller =
        LoopController::new(config(3), knowledge_store(), backend.clone()).unwrap();
    let (_tx, rx) = idle();

    let report = controller
        .run(&requirement(CAVITY_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::FailedExhausted);
    assert!(report.fatal_reason.is_none());
    assert_eq!(report.executions.len(), 3);
    for diagnosis in &report.diagnoses {
        assert_eq!(diagnosis.matched_rule.as_deref(), Some("missing_mesh"));
        assert!(diagnosis.proposed_patch.insert.is_empty());
        let implicated: Vec<&str> = diagnosis
            .implicated_artifact_ids
            .iter()
            .map(ArtifactId::as_str)
            .collect();
        assert!(implicated.contains(&"system/blockMeshDict"));
        assert!(implicated.contains(&"Allrun"));
    }
    assert!(out.path().join("cavity/constant/polyMesh").is_dir());
}

#[tokio::test]
async fn failed_patch_generation_is_recorded_on_the_next_execution() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend(CHANNEL, |request| match request.file_path.as_str() {
        "system/fvSolution" if request.repair.is_some() => "   ".to_string(),
        _ => channel_file(request),
    });
    let controller = LoopController::new(config(2), knowledge_store(), backend).unwrap();
    let (_tx, rx) = idle();

    let report = controller
        .run(&requirement(CHANNEL_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::FailedExhausted);
    assert_eq!(report.iteration_count, 2);
    let executing: Vec<_> = report
        .transitions
        .iter()
        .filter(|t| t.to == Stage::Executing)
        .collect();
    assert_eq!(executing.len(), 2);
    assert!(executing[0].reason.is_none());
    let note = executing[1].reason.as_deref().unwrap();
    assert!(note.starts_with("patch not applied"));
    assert!(note.contains("system/fvSolution"));

    let summary = read_summary(&out.path().join("channelProbe")).unwrap();
    assert_eq!(summary.transitions, report.transitions);
}

#[tokio::test]
async fn single_iteration_budget_exhausts_after_one_diagnosis() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend(CAVITY, |request| match request.file_path.as_str() {
        "Allrun" => ALLRUN_DIVERGES.to_string(),
        other => generic_file(other),
    });
    let controller = LoopController::new(config(1), knowledge_store(), backend).unwrap();
    let (_tx, rx) = idle();

    let report = controller
        .run(&requirement(CAVITY_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::FailedExhausted);
    assert_eq!(report.iteration_count, 1);
    assert_eq!(report.executions.len(), 1);
    assert_eq!(report.diagnoses.len(), 1);
    assert_eq!(
        report.transitions.last().map(|t| t.to),
        Some(Stage::FailedExhausted)
    );
}

#[tokio::test]
async fn failing_case_stops_at_exactly_max_iterations() {
    for max in 1..=4u32 {
        let out = tempfile::tempdir().unwrap();
        let backend = backend(CAVITY, |request| match request.file_path.as_str() {
            "Allrun" => ALLRUN_DIVERGES.to_string(),
            other => generic_file(other),
        });
        let controller =
            LoopController::new(config(max), knowledge_store(), backend.clone()).unwrap();
        let (_tx, rx) = idle();

        let report = controller
            .run(&requirement(CAVITY_REQUIREMENT), out.path(), rx)
            .await
            .unwrap();

        assert_eq!(report.terminal_status, TerminalStatus::FailedExhausted, "max {max}");
        assert_eq!(report.iteration_count, max);
        assert_eq!(report.executions.len() as u32, max);
        assert_eq!(report.diagnoses.len() as u32, max);
        let executing = report
            .transitions
            .iter()
            .filter(|t| t.to == Stage::Executing)
            .count();
        assert_eq!(executing as u32, max);
        // The run script itself is never implicated by a divergence.
        assert_eq!(backend.artifact_prompts("Allrun").len(), 1);
    }
}

#[tokio::test]
async fn solver_timeout_is_diagnosed_not_fatal() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend(CAVITY, |request| match request.file_path.as_str() {
        "Allrun" => ALLRUN_SLEEPS.to_string(),
        other => generic_file(other),
    });
    let mut config = config(1);
    config.executor.timeout_secs = 1;
    let controller = LoopController::new(config, knowledge_store(), backend).unwrap();
    let (_tx, rx) = idle();

    let started = std::time::Instant::now();
    let report = controller
        .run(&requirement(CAVITY_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    assert!(started.elapsed().as_secs() < 20);
    assert_eq!(report.terminal_status, TerminalStatus::FailedExhausted);
    assert_eq!(report.executions[0].exit_status, ExitStatus::Timeout);
    assert_eq!(report.diagnoses[0].error_category, ErrorCategory::Timeout);
}

#[tokio::test]
async fn cancellation_ends_the_case_as_fatal() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend(CAVITY, |request| match request.file_path.as_str() {
        "Allrun" => ALLRUN_SLEEPS.to_string(),
        other => generic_file(other),
    });
    let controller = LoopController::new(config(5), knowledge_store(), backend).unwrap();
    let (tx, rx) = watch::channel(false);
    let req = requirement(CAVITY_REQUIREMENT);

    let started = std::time::Instant::now();
    let (report, _) = tokio::join!(controller.run(&req, out.path(), rx), async {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        tx.send(true).unwrap();
    });
    let report = report.unwrap();

    assert!(started.elapsed().as_secs() < 20);
    assert_eq!(report.terminal_status, TerminalStatus::FailedFatal);
    assert_eq!(report.fatal_reason.as_deref(), Some("execution cancelled"));
    assert_eq!(report.executions.len(), 1);
    assert_eq!(report.executions[0].exit_status, ExitStatus::Cancelled);
    assert!(report.diagnoses.is_empty());
    assert!(!controller.registry().is_active(&out.path().join("cavity")));
}

#[tokio::test]
async fn unmatched_requirement_fails_planning_without_a_case_dir() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend(CAVITY, cavity_file);
    let controller =
        LoopController::new(config(3), knowledge_store(), backend.clone()).unwrap();
    let (_tx, rx) = idle();

    let report = controller
        .run(&requirement("quantum chromodynamics lattice gauge"), out.path(), rx)
        .await
        .unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::FailedFatal);
    assert!(report.case_dir.is_none());
    assert!(report.executions.is_empty());
    assert!(report.fatal_reason.unwrap().contains("planning failed"));
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn classification_outside_candidates_fails_planning() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend("incompressible/simpleFoam/pitzDaily", cavity_file);
    let controller = LoopController::new(config(3), knowledge_store(), backend).unwrap();
    let (_tx, rx) = idle();

    let report = controller
        .run(&requirement(CAVITY_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::FailedFatal);
    assert!(report.case_dir.is_none());
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn initial_generation_failure_is_fatal_before_execution() {
    let out = tempfile::tempdir().unwrap();
    let backend = backend(CAVITY, |request| match request.file_path.as_str() {
        "0/p" => "   ".to_string(),
        _ => cavity_file(request),
    });
    let controller =
        LoopController::new(config(3), knowledge_store(), backend.clone()).unwrap();
    let (_tx, rx) = idle();

    let report = controller
        .run(&requirement(CAVITY_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::FailedFatal);
    assert!(report.executions.is_empty());
    assert_eq!(backend.artifact_prompts("0/p").len(), 3);
    assert!(backend.artifact_prompts("Allrun").is_empty());
    assert!(report.fatal_reason.unwrap().contains("0/p"));
}

#[tokio::test]
async fn identical_inputs_produce_identical_artifacts_and_diagnoses() {
    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let out = tempfile::tempdir().unwrap();
        let backend = backend(CHANNEL, channel_file);
        let controller = LoopController::new(config(5), knowledge_store(), backend).unwrap();
        let (_tx, rx) = idle();
        let report = controller
            .run(&requirement(CHANNEL_REQUIREMENT), out.path(), rx)
            .await
            .unwrap();
        outcomes.push((report.artifacts, report.diagnoses));
    }
    assert_eq!(outcomes[0], outcomes[1]);
}

#[tokio::test]
async fn custom_mesh_replaces_generated_mesh_definition() {
    let out = tempfile::tempdir().unwrap();
    let mesh_dir = tempfile::tempdir().unwrap();
    let mesh_path = mesh_dir.path().join("cavity.msh");
    std::fs::write(&mesh_path, "$MeshFormat\n2.2 0 8\n$EndMeshFormat").unwrap();

    let backend = backend(CAVITY, cavity_file);
    let controller =
        LoopController::new(config(3), knowledge_store(), backend.clone()).unwrap();
    let (_tx, rx) = idle();
    let req = requirement(CAVITY_REQUIREMENT).with_custom_mesh(foamflow_core::CustomMesh::new(
        &mesh_path,
        foamflow_core::MeshFormat::Msh,
    ));

    let report = controller.run(&req, out.path(), rx).await.unwrap();

    assert_eq!(report.terminal_status, TerminalStatus::Success);
    assert!(backend.artifact_prompts("system/blockMeshDict").is_empty());
    assert!(out.path().join("cavity/cavity.msh").exists());
    let u_prompt = &backend.artifact_prompts("0/U")[0];
    let StructuredPrompt::GenerateArtifact(request) = u_prompt else {
        panic!("expected an artifact prompt");
    };
    assert!(request.custom_mesh.is_some());
}

#[tokio::test]
async fn tampered_summary_is_rejected() {
    let out = tempfile::tempdir().unwrap();
    let controller =
        LoopController::new(config(3), knowledge_store(), backend(CAVITY, cavity_file)).unwrap();
    let (_tx, rx) = idle();
    controller
        .run(&requirement(CAVITY_REQUIREMENT), out.path(), rx)
        .await
        .unwrap();

    let case_dir = out.path().join("cavity");
    let summary = case_dir.join(".foamflow/summary.json");
    let text = std::fs::read_to_string(&summary).unwrap();
    std::fs::write(&summary, text.replace("\"success\"", "\"failed_exhausted\"")).unwrap();

    assert!(matches!(
        read_summary(&case_dir),
        Err(foamflow_core::FoamError::DigestMismatch { .. })
    ));
}
