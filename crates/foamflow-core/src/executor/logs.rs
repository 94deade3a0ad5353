//! Solver log collection and completion checks.

use std::path::Path;

use crate::domain::Result;

const ERROR_MARKERS: &[&str] = &["ERROR:", "FOAM FATAL"];

/// One file captured into an execution log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub name: String,
    pub content: String,
}

/// Every `log.*` file in the case root, sorted by name.
pub fn read_solver_logs(case_dir: &Path) -> Result<Vec<LogFile>> {
    let mut logs = Vec::new();
    for entry in std::fs::read_dir(case_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("log.") || !entry.file_type()?.is_file() {
            continue;
        }
        let bytes = std::fs::read(entry.path())?;
        logs.push(LogFile {
            name,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    logs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(logs)
}

/// Whether the solver logs describe a completed run.
///
/// Any error marker fails the check. Otherwise every log must contain an
/// `End` line; utilities and solvers print it on normal termination.
pub fn logs_complete(logs: &[LogFile]) -> bool {
    let has_error = logs
        .iter()
        .any(|log| ERROR_MARKERS.iter().any(|m| log.content.contains(m)));
    if has_error {
        return false;
    }
    logs.iter()
        .all(|log| log.content.lines().any(|line| line.trim() == "End"))
}

/// Concatenate captured output verbatim with `==> name <==` headers.
pub fn assemble_captured_log(sections: &[(&str, &str)], logs: &[LogFile]) -> String {
    let mut out = String::new();
    let all = sections
        .iter()
        .copied()
        .chain(logs.iter().map(|l| (l.name.as_str(), l.content.as_str())));
    for (name, content) in all {
        if content.is_empty() {
            continue;
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("==> ");
        out.push_str(name);
        out.push_str(" <==\n");
        out.push_str(content);
    }
    out
}
