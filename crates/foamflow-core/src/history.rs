//! Persisted case history under `<case_dir>/.foamflow/`.
//!
//! ```text
//! .foamflow/
//!   plan.json            current plan
//!   executions.jsonl     one ExecutionResult per line
//!   diagnoses.jsonl      one Diagnosis per line
//!   versions/<id>@v<N>   superseded artifact contents
//!   summary.json         final CaseReport
//!   summary.digest       SHA-256 of summary.json
//! ```
//!
//! Nothing here is ever deleted by the pipeline.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{
    content_digest, ArtifactStore, CasePlan, CaseReport, Diagnosis, ExecutionResult, FoamError,
    Result,
};
use crate::planner::ReferenceCase;

pub const HISTORY_DIR: &str = ".foamflow";
pub const REFERENCE_FILE: &str = "reference_case.txt";

const PLAN_FILE: &str = "plan.json";
const EXECUTIONS_FILE: &str = "executions.jsonl";
const DIAGNOSES_FILE: &str = "diagnoses.jsonl";
const VERSIONS_DIR: &str = "versions";
const SUMMARY_FILE: &str = "summary.json";
const DIGEST_FILE: &str = "summary.digest";

#[derive(Debug, Clone)]
pub struct CaseHistory {
    case_dir: PathBuf,
    dir: PathBuf,
}

impl CaseHistory {
    /// Open (creating if needed) the history of `case_dir`.
    pub fn open(case_dir: &Path) -> Result<Self> {
        let dir = case_dir.join(HISTORY_DIR);
        std::fs::create_dir_all(dir.join(VERSIONS_DIR))?;
        Ok(Self {
            case_dir: case_dir.to_path_buf(),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_plan(&self, plan: &CasePlan) -> Result<()> {
        std::fs::write(self.dir.join(PLAN_FILE), serde_json::to_vec_pretty(plan)?)?;
        Ok(())
    }

    pub fn read_plan(&self) -> Result<CasePlan> {
        Ok(serde_json::from_slice(&std::fs::read(self.dir.join(PLAN_FILE))?)?)
    }

    /// Write the retrieved reference case next to the generated files.
    pub fn write_reference(&self, reference: &ReferenceCase) -> Result<()> {
        let mut out = format!(
            "reference: {}\ncase name: {}\nrelevance: {:.4}\n\n",
            reference.id, reference.case_name, reference.score
        );
        for entry in &reference.structure {
            let folder = if entry.folder.is_empty() { "." } else { &entry.folder };
            out.push_str(&format!("{folder}/\n"));
            for file in &entry.files {
                out.push_str(&format!("    {file}\n"));
            }
        }
        std::fs::write(self.case_dir.join(REFERENCE_FILE), out)?;
        Ok(())
    }

    pub fn append_execution(&self, result: &ExecutionResult) -> Result<()> {
        append_line(&self.dir.join(EXECUTIONS_FILE), result)
    }

    pub fn append_diagnosis(&self, diagnosis: &Diagnosis) -> Result<()> {
        append_line(&self.dir.join(DIAGNOSES_FILE), diagnosis)
    }

    pub fn executions(&self) -> Result<Vec<ExecutionResult>> {
        read_lines(&self.dir.join(EXECUTIONS_FILE))
    }

    pub fn diagnoses(&self) -> Result<Vec<Diagnosis>> {
        read_lines(&self.dir.join(DIAGNOSES_FILE))
    }

    /// Write every superseded revision not yet on disk. Returns how many were written.
    pub fn archive_revisions(&self, store: &ArtifactStore) -> Result<usize> {
        let mut written = 0;
        for artifact in store.iter() {
            for revision in &artifact.revisions {
                let path = self.revision_path(artifact.id.as_str(), revision.version);
                if path.exists() {
                    continue;
                }
                std::fs::write(&path, revision.content.as_bytes())?;
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn revision_path(&self, artifact_id: &str, version: u32) -> PathBuf {
        self.dir
            .join(VERSIONS_DIR)
            .join(format!("{}@v{version}", artifact_id.replace('/', "__")))
    }

    /// Write `summary.json` and its digest.
    pub fn write_summary(&self, report: &CaseReport) -> Result<PathBuf> {
        let json = serde_json::to_vec_pretty(report)?;
        let digest = content_digest(&json);
        let path = self.dir.join(SUMMARY_FILE);
        std::fs::write(&path, &json)?;
        std::fs::write(self.dir.join(DIGEST_FILE), digest.as_bytes())?;
        Ok(path)
    }
}

/// Read and verify `<case_dir>/.foamflow/summary.json`.
pub fn read_summary(case_dir: &Path) -> Result<CaseReport> {
    let dir = case_dir.join(HISTORY_DIR);
    let json = std::fs::read(dir.join(SUMMARY_FILE))?;
    let expected = std::fs::read_to_string(dir.join(DIGEST_FILE))?;
    let actual = content_digest(&json);
    if expected.trim() != actual {
        return Err(FoamError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    Ok(())
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    std::fs::read_to_string(path)?
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(FoamError::from))
        .collect()
}
