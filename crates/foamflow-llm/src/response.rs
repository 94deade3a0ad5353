//! Structured responses and their validation.
//!
//! [`parse_response`] never fails: text that does not match the shape the
//! prompt asked for comes back as [`StructuredResponse::Malformed`] with the
//! raw text attached for diagnosis.

use serde::{Deserialize, Serialize};

use crate::prompt::{CaseCandidate, StructuredPrompt};

/// The reference case chosen for a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseClassification {
    /// Id of the chosen candidate; always one of the offered candidates.
    pub reference_id: String,
    /// Name for the new case (not yet sanitized).
    pub case_name: String,
    pub domain: String,
    pub category: String,
    pub solver: String,
}

/// Content produced for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactContent {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairAdvice {
    pub advice: String,
}

/// Validated model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuredResponse {
    Classification(CaseClassification),
    Artifact(ArtifactContent),
    Advice(RepairAdvice),
    Malformed { reason: String, raw: String },
}

impl StructuredResponse {
    pub fn is_malformed(&self) -> bool {
        matches!(self, StructuredResponse::Malformed { .. })
    }

    fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        StructuredResponse::Malformed {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassificationJson {
    #[serde(default)]
    reference_id: String,
    #[serde(default)]
    case_name: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    solver: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactJson {
    #[serde(default)]
    file_path: Option<String>,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AdviceJson {
    advice: String,
}

/// Validate `raw` against the shape `prompt` expects.
pub fn parse_response(prompt: &StructuredPrompt, raw: &str) -> StructuredResponse {
    if raw.trim().is_empty() {
        return StructuredResponse::malformed("empty response", raw);
    }
    match prompt {
        StructuredPrompt::ClassifyCase { candidates, .. } => parse_classification(candidates, raw),
        StructuredPrompt::GenerateArtifact(req) => parse_artifact(&req.file_path, raw),
        StructuredPrompt::AdviseRepair { .. } => parse_advice(raw),
    }
}

fn parse_classification(candidates: &[CaseCandidate], raw: &str) -> StructuredResponse {
    let Some(json) = extract_json_object(raw) else {
        return StructuredResponse::malformed("no JSON object in classification", raw);
    };
    let parsed: ClassificationJson = match serde_json::from_str(json) {
        Ok(p) => p,
        Err(e) => return StructuredResponse::malformed(format!("invalid classification: {e}"), raw),
    };

    let chosen = candidates
        .iter()
        .find(|c| !parsed.reference_id.is_empty() && c.reference_id == parsed.reference_id)
        .or_else(|| {
            let mut by_name = candidates
                .iter()
                .filter(|c| !parsed.case_name.is_empty() && c.case_name == parsed.case_name);
            match (by_name.next(), by_name.next()) {
                (Some(only), None) => Some(only),
                _ => None,
            }
        });
    let Some(chosen) = chosen else {
        return StructuredResponse::malformed("chosen case is not among the candidates", raw);
    };

    let or_candidate = |value: String, fallback: &str| {
        if value.trim().is_empty() {
            fallback.to_string()
        } else {
            value.trim().to_string()
        }
    };
    StructuredResponse::Classification(CaseClassification {
        reference_id: chosen.reference_id.clone(),
        case_name: or_candidate(parsed.case_name, &chosen.case_name),
        domain: or_candidate(parsed.domain, &chosen.domain),
        category: or_candidate(parsed.category, &chosen.category),
        solver: or_candidate(parsed.solver, &chosen.solver),
    })
}

fn parse_artifact(file_path: &str, raw: &str) -> StructuredResponse {
    let body = extract_fenced_block(raw).unwrap_or_else(|| raw.trim());
    let body = body.trim();

    let content = if body.starts_with('{') {
        match serde_json::from_str::<ArtifactJson>(body) {
            Ok(parsed) => {
                if let Some(path) = parsed.file_path.as_deref() {
                    if !path.is_empty() && path != file_path {
                        return StructuredResponse::malformed(
                            format!("response is for {path}, expected {file_path}"),
                            raw,
                        );
                    }
                }
                parsed.content
            }
            Err(e) => {
                return StructuredResponse::malformed(format!("invalid artifact JSON: {e}"), raw)
            }
        }
    } else {
        body.to_string()
    };

    if content.trim().is_empty() {
        return StructuredResponse::malformed("artifact content is empty", raw);
    }
    StructuredResponse::Artifact(ArtifactContent {
        file_path: file_path.to_string(),
        content,
    })
}

fn parse_advice(raw: &str) -> StructuredResponse {
    let advice = match extract_json_object(raw) {
        Some(json) => match serde_json::from_str::<AdviceJson>(json) {
            Ok(parsed) => parsed.advice,
            Err(e) => return StructuredResponse::malformed(format!("invalid advice: {e}"), raw),
        },
        None => raw.trim().to_string(),
    };
    if advice.trim().is_empty() {
        return StructuredResponse::malformed("advice is empty", raw);
    }
    StructuredResponse::Advice(RepairAdvice { advice })
}

/// Body of the first ``` fenced block, without the language tag line.
fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// First JSON object in `text`, looking inside a fenced block first.
fn extract_json_object(text: &str) -> Option<&str> {
    let scope = extract_fenced_block(text).unwrap_or(text);
    let start = scope.find('{')?;
    let end = scope.rfind('}')?;
    (end > start).then(|| &scope[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{ArtifactRequest, CaseSummary};

    fn classify_prompt() -> StructuredPrompt {
        StructuredPrompt::ClassifyCase {
            requirement: "lid-driven cavity".into(),
            candidates: vec![
                CaseCandidate {
                    reference_id: "incompressible/icoFoam/cavity".into(),
                    case_name: "cavity".into(),
                    domain: "incompressible".into(),
                    category: "laminar".into(),
                    solver: "icoFoam".into(),
                    score: 0.8,
                },
                CaseCandidate {
                    reference_id: "incompressible/simpleFoam/pitzDaily".into(),
                    case_name: "pitzDaily".into(),
                    domain: "incompressible".into(),
                    category: "RAS".into(),
                    solver: "simpleFoam".into(),
                    score: 0.2,
                },
            ],
        }
    }

    fn artifact_prompt(path: &str) -> StructuredPrompt {
        StructuredPrompt::GenerateArtifact(ArtifactRequest {
            requirement: "cavity".into(),
            case: CaseSummary {
                case_name: "cavity".into(),
                domain: "incompressible".into(),
                category: "laminar".into(),
                solver: "icoFoam".into(),
            },
            file_path: path.into(),
            role: "solver_control".into(),
            plan_files: vec![path.into()],
            references: vec![],
            dependencies: vec![],
            custom_mesh: None,
            repair: None,
        })
    }

    #[test]
    fn test_classification_in_fenced_json() {
        let raw = "Here you go:\n```json\n{\"reference_id\": \"incompressible/icoFoam/cavity\", \"case_name\": \"my cavity\"}\n```";
        match parse_response(&classify_prompt(), raw) {
            StructuredResponse::Classification(c) => {
                assert_eq!(c.case_name, "my cavity");
                assert_eq!(c.solver, "icoFoam");
                assert_eq!(c.domain, "incompressible");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classification_outside_candidates_is_malformed() {
        let raw = r#"{"reference_id": "multiphase/interFoam/damBreak", "case_name": "damBreak"}"#;
        assert!(parse_response(&classify_prompt(), raw).is_malformed());
    }

    #[test]
    fn test_classification_resolves_by_unique_case_name() {
        let raw = r#"{"case_name": "pitzDaily", "solver": "simpleFoam"}"#;
        match parse_response(&classify_prompt(), raw) {
            StructuredResponse::Classification(c) => {
                assert_eq!(c.reference_id, "incompressible/simpleFoam/pitzDaily")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_artifact_json_and_plain_text() {
        let json = r#"{"file_path": "system/controlDict", "content": "application icoFoam;"}"#;
        let plain = "```\napplication icoFoam;\n```";
        for raw in [json, plain] {
            match parse_response(&artifact_prompt("system/controlDict"), raw) {
                StructuredResponse::Artifact(a) => {
                    assert_eq!(a.file_path, "system/controlDict");
                    assert_eq!(a.content.trim(), "application icoFoam;");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_artifact_for_wrong_path_is_malformed() {
        let raw = r#"{"file_path": "system/fvSchemes", "content": "x"}"#;
        assert!(parse_response(&artifact_prompt("system/controlDict"), raw).is_malformed());
    }

    #[test]
    fn test_broken_json_and_empty_are_malformed() {
        let prompt = artifact_prompt("0/U");
        assert!(parse_response(&prompt, "{\"content\": ").is_malformed());
        assert!(parse_response(&prompt, "   ").is_malformed());
        assert!(parse_response(&prompt, r#"{"content": "  "}"#).is_malformed());
    }

    #[test]
    fn test_advice_accepts_json_or_text() {
        let prompt = StructuredPrompt::AdviseRepair {
            requirement: "r".into(),
            category: "numerical_divergence".into(),
            log_excerpt: "nan".into(),
            artifacts: vec![],
        };
        assert_eq!(
            parse_response(&prompt, r#"{"advice": "lower deltaT"}"#),
            StructuredResponse::Advice(RepairAdvice {
                advice: "lower deltaT".into()
            })
        );
        assert!(matches!(
            parse_response(&prompt, "lower deltaT"),
            StructuredResponse::Advice(_)
        ));
    }
}
