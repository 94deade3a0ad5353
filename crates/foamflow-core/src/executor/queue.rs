//! Batch-queue execution (Slurm-compatible command line).
//!
//! The run script is wrapped in a batch script that records its exit code,
//! submitted, then polled until it leaves the queue.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::guard::JobGuard;
use super::process::{cancelled, shell_line, shell_quote, ProcessOutput};
use crate::domain::{ExitStatus, FoamError, Result};

pub(crate) const BATCH_SCRIPT: &str = "foamflow.sbatch";
pub(crate) const EXIT_CODE_FILE: &str = "foamflow.exit";

/// Settings for one queued submission.
#[derive(Debug, Clone)]
pub(crate) struct QueueJob<'a> {
    pub job_name: &'a str,
    pub script: &'a str,
    pub bootstrap: Option<&'a Path>,
    pub stdout_file: &'a str,
    pub stderr_file: &'a str,
    pub submit_program: &'a str,
    pub status_program: &'a str,
    pub cancel_program: &'a str,
    pub poll_interval: Duration,
    pub directives: &'a [String],
}

fn job_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Submitted batch job (\d+)").ok())
        .as_ref()
}

pub(crate) fn parse_job_id(submit_output: &str) -> Option<String> {
    job_id_pattern()?
        .captures(submit_output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub(crate) fn render_batch_script(case_dir: &Path, job: &QueueJob<'_>) -> String {
    let mut out = String::from("#!/bin/bash\n");
    out.push_str(&format!("#SBATCH --job-name={}\n", job.job_name));
    out.push_str(&format!("#SBATCH --output={}\n", job.stdout_file));
    out.push_str(&format!("#SBATCH --error={}\n", job.stderr_file));
    for directive in job.directives {
        out.push_str(&format!("#SBATCH {}\n", directive.trim()));
    }
    out.push('\n');
    out.push_str(&format!("cd {}\n", shell_quote(&case_dir.to_string_lossy())));
    out.push_str(&shell_line(job.script, job.bootstrap));
    out.push('\n');
    out.push_str("status=$?\n");
    out.push_str(&format!("echo $status > {EXIT_CODE_FILE}\n"));
    out.push_str("exit $status\n");
    out
}

async fn job_in_queue(status_program: &str, job_id: &str) -> Result<bool> {
    let output = Command::new(status_program)
        .args(["-j", job_id, "--noheader", "-o", "%T"])
        .output()
        .await?;
    let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(job_id, state = %state, "job status polled");
    // squeue exits non-zero for an id it no longer knows.
    Ok(output.status.success() && !state.is_empty())
}

fn read_lossy(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap_or_default()
}

pub(crate) async fn run_queued(
    case_dir: &Path,
    job: &QueueJob<'_>,
    timeout: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> Result<ProcessOutput> {
    if *cancel.borrow() {
        return Ok(ProcessOutput::cancelled());
    }

    let exit_file = case_dir.join(EXIT_CODE_FILE);
    if exit_file.exists() {
        std::fs::remove_file(&exit_file)?;
    }
    let batch_path = case_dir.join(BATCH_SCRIPT);
    std::fs::write(&batch_path, render_batch_script(case_dir, job))?;

    let submitted = Command::new(job.submit_program)
        .arg(&batch_path)
        .current_dir(case_dir)
        .output()
        .await
        .map_err(|e| FoamError::Launch {
            reason: format!("failed to run {}: {e}", job.submit_program),
        })?;
    let submit_stdout = String::from_utf8_lossy(&submitted.stdout).into_owned();
    if !submitted.status.success() {
        return Err(FoamError::Launch {
            reason: format!(
                "{} exited with {}: {}",
                job.submit_program,
                submitted.status,
                String::from_utf8_lossy(&submitted.stderr).trim()
            ),
        });
    }
    let job_id = parse_job_id(&submit_stdout).ok_or_else(|| FoamError::Launch {
        reason: format!("no job id in submit output: {}", submit_stdout.trim()),
    })?;
    info!(job_id = %job_id, "job submitted");
    let mut guard = JobGuard::new(job.cancel_program, job_id.clone());

    let deadline = Instant::now() + timeout;
    let exit_status = loop {
        tokio::select! {
            _ = tokio::time::sleep(job.poll_interval) => {}
            _ = tokio::time::sleep_until(deadline) => {
                warn!(job_id = %job_id, "job timed out; cancelling");
                guard.cancel();
                break ExitStatus::Timeout;
            }
            _ = cancelled(cancel) => {
                warn!(job_id = %job_id, "job run cancelled; cancelling");
                guard.cancel();
                break ExitStatus::Cancelled;
            }
        }
        if !job_in_queue(job.status_program, &job_id).await? {
            guard.disarm();
            let code = std::fs::read_to_string(&exit_file)
                .ok()
                .and_then(|raw| raw.trim().parse::<i32>().ok());
            break match code {
                Some(code) => ExitStatus::Exited { code },
                None => ExitStatus::Signaled,
            };
        }
    };

    Ok(ProcessOutput {
        exit_status,
        stdout: read_lossy(&case_dir.join(job.stdout_file)),
        stderr: read_lossy(&case_dir.join(job.stderr_file)),
        job_id: Some(job_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job<'a>(directives: &'a [String]) -> QueueJob<'a> {
        QueueJob {
            job_name: "cavity",
            script: "Allrun",
            bootstrap: None,
            stdout_file: "Allrun.out",
            stderr_file: "Allrun.err",
            submit_program: "sbatch",
            status_program: "squeue",
            cancel_program: "scancel",
            poll_interval: Duration::from_millis(50),
            directives,
        }
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(
            parse_job_id("Submitted batch job 123456\n").as_deref(),
            Some("123456")
        );
        assert_eq!(parse_job_id("sbatch: error: invalid partition"), None);
    }

    #[test]
    fn test_render_batch_script() {
        let directives = vec!["--partition=cpu".to_string()];
        let script = render_batch_script(Path::new("/work/cavity"), &job(&directives));
        assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name=cavity\n"));
        assert!(script.contains("#SBATCH --partition=cpu\n"));
        assert!(script.contains("cd /work/cavity\nbash Allrun\n"));
        assert!(script.contains("echo $status > foamflow.exit"));
    }

    /// `bash` stands in for the submit program and runs the batch script in
    /// place; `false` reports the job as gone on the first poll.
    #[tokio::test]
    async fn test_run_queued_with_stand_in_queue() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Allrun"),
            "echo \"Submitted batch job 77\"\necho solved > Allrun.out\nexit 0\n",
        )
        .unwrap();

        let directives = Vec::new();
        let job = QueueJob {
            submit_program: "bash",
            status_program: "false",
            cancel_program: "",
            ..job(&directives)
        };
        let (_tx, mut rx) = watch::channel(false);
        let out = run_queued(dir.path(), &job, Duration::from_secs(30), &mut rx)
            .await
            .unwrap();
        assert_eq!(out.exit_status, ExitStatus::Exited { code: 0 });
        assert_eq!(out.job_id.as_deref(), Some("77"));
        assert!(String::from_utf8_lossy(&out.stdout).contains("solved"));
        assert!(dir.path().join(BATCH_SCRIPT).exists());
    }

    #[tokio::test]
    async fn test_submit_without_job_id_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Allrun"), "exit 0\n").unwrap();
        let directives = Vec::new();
        let job = QueueJob {
            submit_program: "bash",
            status_program: "false",
            cancel_program: "",
            ..job(&directives)
        };
        let (_tx, mut rx) = watch::channel(false);
        let err = run_queued(dir.path(), &job, Duration::from_secs(30), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, FoamError::Launch { .. }));
    }
}
