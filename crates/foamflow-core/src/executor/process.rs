//! Local solver process.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::guard::ProcessGroupGuard;
use crate::domain::{ExitStatus, FoamError, Result};

/// Time allowed for output readers to drain after the child is gone.
const READER_GRACE: Duration = Duration::from_secs(5);

/// Raw outcome of one solver invocation.
#[derive(Debug, Clone)]
pub(crate) struct ProcessOutput {
    pub exit_status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub job_id: Option<String>,
}

impl ProcessOutput {
    pub(crate) fn cancelled() -> Self {
        Self {
            exit_status: ExitStatus::Cancelled,
            stdout: Vec::new(),
            stderr: Vec::new(),
            job_id: None,
        }
    }
}

/// `source <bootstrap> && bash <script>`, or just `bash <script>`.
pub(crate) fn shell_line(script: &str, bootstrap: Option<&Path>) -> String {
    let run = format!("bash {}", shell_quote(script));
    match bootstrap {
        Some(path) => format!("source {} && {run}", shell_quote(&path.to_string_lossy())),
        None => run,
    }
}

pub(crate) fn shell_quote(raw: &str) -> String {
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | '='))
    {
        return raw.to_string();
    }
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Resolves once `cancel` reads true. Never resolves if the sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn spawn_reader<R>(mut stream: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .extend_from_slice(&chunk[..n]),
            }
        }
    })
}

async fn finish_reader(handle: Option<JoinHandle<()>>, sink: &Arc<Mutex<Vec<u8>>>) -> Vec<u8> {
    if let Some(mut handle) = handle {
        if tokio::time::timeout(READER_GRACE, &mut handle).await.is_err() {
            warn!("output reader did not finish; keeping partial output");
            handle.abort();
        }
    }
    std::mem::take(&mut *sink.lock().unwrap_or_else(|p| p.into_inner()))
}

/// Run the case script under bash in `case_dir`.
///
/// Output is drained concurrently so whatever was printed before a timeout
/// or cancellation is still returned.
pub(crate) async fn run_local(
    case_dir: &Path,
    script: &str,
    bootstrap: Option<&Path>,
    timeout: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> Result<ProcessOutput> {
    if *cancel.borrow() {
        return Ok(ProcessOutput::cancelled());
    }

    let mut command = Command::new("bash");
    command
        .arg("-c")
        .arg(shell_line(script, bootstrap))
        .current_dir(case_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|e| FoamError::Launch {
        reason: format!("failed to start {script} in {}: {e}", case_dir.display()),
    })?;
    let mut guard = ProcessGroupGuard::new(child.id());
    debug!(pid = ?child.id(), script, "solver started");

    let stdout_sink = Arc::new(Mutex::new(Vec::new()));
    let stderr_sink = Arc::new(Mutex::new(Vec::new()));
    let stdout_reader = child
        .stdout
        .take()
        .map(|s| spawn_reader(s, Arc::clone(&stdout_sink)));
    let stderr_reader = child
        .stderr
        .take()
        .map(|s| spawn_reader(s, Arc::clone(&stderr_sink)));

    let exit_status = tokio::select! {
        waited = child.wait() => {
            guard.disarm();
            let status = waited?;
            match status.code() {
                Some(code) => ExitStatus::Exited { code },
                None => ExitStatus::Signaled,
            }
        }
        _ = tokio::time::sleep(timeout) => {
            warn!(timeout_secs = timeout.as_secs(), "solver timed out; killing");
            guard.kill();
            let _ = child.start_kill();
            let _ = child.wait().await;
            ExitStatus::Timeout
        }
        _ = cancelled(cancel) => {
            warn!("solver run cancelled; killing");
            guard.kill();
            let _ = child.start_kill();
            let _ = child.wait().await;
            ExitStatus::Cancelled
        }
    };

    Ok(ProcessOutput {
        exit_status,
        stdout: finish_reader(stdout_reader, &stdout_sink).await,
        stderr: finish_reader(stderr_reader, &stderr_sink).await,
        job_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_line() {
        assert_eq!(shell_line("Allrun", None), "bash Allrun");
        assert_eq!(
            shell_line("Allrun", Some(Path::new("/opt/openfoam11/etc/bashrc"))),
            "source /opt/openfoam11/etc/bashrc && bash Allrun"
        );
        assert_eq!(shell_quote("my case"), "'my case'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_run_local_captures_output_and_code() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Allrun"), "echo hello\necho oops >&2\nexit 3\n").unwrap();
        let (_tx, mut rx) = watch::channel(false);
        let out = run_local(dir.path(), "Allrun", None, Duration::from_secs(30), &mut rx)
            .await
            .unwrap();
        assert_eq!(out.exit_status, ExitStatus::Exited { code: 3 });
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "oops\n");
    }

    #[tokio::test]
    async fn test_run_local_timeout_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Allrun"), "echo started\nsleep 30\necho never\n").unwrap();
        let (_tx, mut rx) = watch::channel(false);
        let start = std::time::Instant::now();
        let out = run_local(dir.path(), "Allrun", None, Duration::from_secs(1), &mut rx)
            .await
            .unwrap();
        assert_eq!(out.exit_status, ExitStatus::Timeout);
        assert!(String::from_utf8_lossy(&out.stdout).contains("started"));
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_run_local_precancelled_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Allrun"), "touch spawned\n").unwrap();
        let (_tx, mut rx) = watch::channel(true);
        let out = run_local(dir.path(), "Allrun", None, Duration::from_secs(5), &mut rx)
            .await
            .unwrap();
        assert_eq!(out.exit_status, ExitStatus::Cancelled);
        assert!(!dir.path().join("spawned").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_launch_error() {
        let (_tx, mut rx) = watch::channel(false);
        let err = run_local(
            Path::new("/nonexistent/foamflow/case"),
            "Allrun",
            None,
            Duration::from_secs(5),
            &mut rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FoamError::Launch { .. }));
    }
}
