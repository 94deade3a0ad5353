//! Backend output flows through validation before reaching callers.

use foamflow_llm::fakes::ScriptedBackend;
use foamflow_llm::{
    complete_structured, CaseCandidate, LlmError, StructuredPrompt, StructuredResponse,
};

fn classify() -> StructuredPrompt {
    StructuredPrompt::ClassifyCase {
        requirement: "2D lid-driven cavity, Re 10".into(),
        candidates: vec![CaseCandidate {
            reference_id: "incompressible/icoFoam/cavity".into(),
            case_name: "cavity".into(),
            domain: "incompressible".into(),
            category: "laminar".into(),
            solver: "icoFoam".into(),
            score: 0.9,
        }],
    }
}

#[tokio::test]
async fn scripted_backend_records_prompts() {
    let backend = ScriptedBackend::new(|_| {
        Ok(r#"{"reference_id": "incompressible/icoFoam/cavity", "case_name": "cavity"}"#.into())
    });

    let response = complete_structured(&backend, &classify()).await.unwrap();
    assert!(matches!(response, StructuredResponse::Classification(_)));
    assert_eq!(backend.call_count(), 1);
    assert_eq!(backend.prompts()[0].requirement(), "2D lid-driven cavity, Re 10");
}

#[tokio::test]
async fn garbage_becomes_malformed_not_error() {
    let backend = ScriptedBackend::new(|_| Ok("I think you should use icoFoam".into()));
    let response = complete_structured(&backend, &classify()).await.unwrap();
    match response {
        StructuredResponse::Malformed { raw, .. } => assert!(raw.contains("icoFoam")),
        other => panic!("expected Malformed, got {other:?}"),
    }
}

#[tokio::test]
async fn backend_errors_propagate() {
    let backend = ScriptedBackend::new(|_| Err(LlmError::Rejected("offline".into())));
    let err = complete_structured(&backend, &classify()).await.unwrap_err();
    assert!(matches!(err, LlmError::Rejected(_)));
}
