//! Cleanup guards for solver processes and queued jobs.
//!
//! Both guards act on drop unless disarmed, so a future dropped mid-run
//! (cancellation, panic, early return) never leaves a solver behind.

use tracing::{debug, warn};

/// Kills a child's whole process group.
///
/// The child is started as its own group leader, so the group id is its pid
/// and `kill -KILL -- -<pgid>` also reaches the solver processes the run
/// script spawned.
#[derive(Debug)]
pub(crate) struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    pub(crate) fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    pub(crate) fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }

    /// The child exited on its own; nothing to clean up.
    pub(crate) fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    match std::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{pgid}")])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
    {
        Ok(status) => debug!(pgid, ?status, "process group killed"),
        Err(err) => warn!(pgid, error = %err, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(pgid: u32) {
    debug!(pgid, "process groups unsupported; relying on kill_on_drop");
}

/// Cancels a submitted batch job.
#[derive(Debug)]
pub(crate) struct JobGuard {
    cancel_program: String,
    job_id: Option<String>,
}

impl JobGuard {
    pub(crate) fn new(cancel_program: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            cancel_program: cancel_program.into(),
            job_id: Some(job_id.into()),
        }
    }

    pub(crate) fn cancel(&mut self) {
        let Some(job_id) = self.job_id.take() else {
            return;
        };
        if self.cancel_program.is_empty() {
            warn!(job_id = %job_id, "no cancel program configured; job left queued");
            return;
        }
        match std::process::Command::new(&self.cancel_program)
            .arg(&job_id)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
        {
            Ok(status) => debug!(job_id = %job_id, ?status, "job cancelled"),
            Err(err) => warn!(job_id = %job_id, error = %err, "failed to cancel job"),
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.job_id = None;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}
