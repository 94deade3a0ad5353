//! Executor: the only component that writes the case directory.
//!
//! A run is cleanup, incremental materialization, one solver invocation
//! (local process or queued job) and log capture. Timeouts and cancellation
//! come back as `ExecutionResult`s; only a solver that cannot be started at
//! all is an error.

mod guard;
pub mod logs;
mod process;
mod queue;
mod registry;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::{ExecutionMode, ExecutorConfig};
use crate::domain::{
    ArtifactId, ArtifactStore, CustomMesh, ExecutionResult, FoamError, MeshFormat, Result,
};
use crate::obs;

pub use logs::LogFile;
pub use registry::{CaseLease, CaseRegistry};

#[derive(Debug, Clone)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn stdout_file(&self) -> String {
        format!("{}.out", self.config.run_script)
    }

    pub fn stderr_file(&self) -> String {
        format!("{}.err", self.config.run_script)
    }

    /// Clean, materialize, run and capture.
    #[instrument(skip_all, fields(case_dir = %case_dir.display(), iteration))]
    pub async fn run(
        &self,
        case_dir: &Path,
        store: &mut ArtifactStore,
        custom_mesh: Option<&CustomMesh>,
        iteration: u32,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<ExecutionResult> {
        std::fs::create_dir_all(case_dir)?;
        if self.config.clean_previous_outputs {
            self.clean_previous_outputs(case_dir, store)?;
        }
        let artifacts_touched = self.materialize(case_dir, store, custom_mesh)?;

        let started_at = Utc::now();
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let stdout_file = self.stdout_file();
        let stderr_file = self.stderr_file();
        let bootstrap = self.config.environment_bootstrap.as_deref();

        let output = match &self.config.mode {
            ExecutionMode::Local => {
                let output = process::run_local(
                    case_dir,
                    &self.config.run_script,
                    bootstrap,
                    timeout,
                    cancel,
                )
                .await?;
                std::fs::write(case_dir.join(&stdout_file), &output.stdout)?;
                std::fs::write(case_dir.join(&stderr_file), &output.stderr)?;
                output
            }
            ExecutionMode::Queued {
                submit_program,
                status_program,
                cancel_program,
                poll_interval_secs,
                directives,
            } => {
                let job_name = case_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "foamflow".to_string());
                let job = queue::QueueJob {
                    job_name: &job_name,
                    script: &self.config.run_script,
                    bootstrap,
                    stdout_file: &stdout_file,
                    stderr_file: &stderr_file,
                    submit_program,
                    status_program,
                    cancel_program,
                    poll_interval: Duration::from_secs(*poll_interval_secs),
                    directives,
                };
                queue::run_queued(case_dir, &job, timeout, cancel).await?
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let solver_logs = logs::read_solver_logs(case_dir)?;
        let logs_complete = logs::logs_complete(&solver_logs);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let captured_log = logs::assemble_captured_log(
            &[(stdout_file.as_str(), &*stdout), (stderr_file.as_str(), &*stderr)],
            &solver_logs,
        );

        let result = ExecutionResult {
            iteration,
            exit_status: output.exit_status,
            duration_ms,
            captured_log,
            artifacts_touched,
            logs_complete,
            job_id: output.job_id,
            started_at,
        };
        obs::emit_execution_finished(
            iteration,
            &result.exit_status,
            duration_ms,
            result.succeeded(),
        );
        Ok(result)
    }

    /// Write artifacts whose content changed since they were last written.
    ///
    /// Returns the ids written, sorted. An artifact whose path is taken by a
    /// directory is skipped and stays dirty; the solver then runs without it
    /// and the failure goes through review.
    pub fn materialize(
        &self,
        case_dir: &Path,
        store: &mut ArtifactStore,
        custom_mesh: Option<&CustomMesh>,
    ) -> Result<Vec<ArtifactId>> {
        let mut written = Vec::new();
        for artifact in store.dirty() {
            let path = case_path(case_dir, &artifact.file_path)?;
            if path.is_dir() {
                warn!(artifact = %artifact.id, "artifact path is a directory, not written");
                continue;
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, artifact.content.as_bytes())?;
            if artifact.file_path == self.config.run_script {
                make_executable(&path)?;
            }
            debug!(artifact = %artifact.id, version = artifact.version, "artifact written");
            written.push(artifact.id.clone());
        }
        written.sort();
        for id in &written {
            store.mark_materialized(id);
        }

        if let Some(mesh) = custom_mesh {
            copy_custom_mesh(case_dir, mesh)?;
        }
        if !written.is_empty() {
            info!(written = written.len(), "artifacts materialized");
        }
        Ok(written)
    }

    /// Remove solver logs, captured output and time directories other than `0`.
    ///
    /// Directories holding a generated artifact are kept.
    pub fn clean_previous_outputs(&self, case_dir: &Path, store: &ArtifactStore) -> Result<()> {
        if !case_dir.exists() {
            return Ok(());
        }
        let artifact_roots: BTreeSet<&str> = store
            .iter()
            .filter_map(|a| a.file_path.split('/').next())
            .collect();
        let stdout_file = self.stdout_file();
        let stderr_file = self.stderr_file();

        for entry in std::fs::read_dir(case_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type()?;
            if file_type.is_file()
                && (name.starts_with("log.") || name == stdout_file || name == stderr_file)
            {
                std::fs::remove_file(entry.path())?;
            } else if file_type.is_dir()
                && is_time_directory(&name)
                && !artifact_roots.contains(name.as_str())
            {
                std::fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }
}

fn is_time_directory(name: &str) -> bool {
    name != "0" && name.parse::<f64>().is_ok_and(|t| t.is_finite() && t >= 0.0)
}

/// Join an artifact path onto the case directory, refusing paths that leave it.
fn case_path(case_dir: &Path, file_path: &str) -> Result<PathBuf> {
    let relative = Path::new(file_path);
    let escapes = relative.is_absolute()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if file_path.is_empty() || escapes {
        return Err(FoamError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("artifact path leaves the case directory: {file_path}"),
        )));
    }
    Ok(case_dir.join(relative))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Copy the custom mesh into the case once. A `foam` mesh is a `polyMesh`
/// directory and lands in `constant/polyMesh`.
fn copy_custom_mesh(case_dir: &Path, mesh: &CustomMesh) -> Result<()> {
    if mesh.format == MeshFormat::Foam && mesh.path.is_dir() {
        let target = case_dir.join("constant").join("polyMesh");
        if !target.exists() {
            copy_dir(&mesh.path, &target)?;
            info!(mesh = %mesh.path.display(), "custom polyMesh copied");
        }
        return Ok(());
    }
    let file_name = mesh.file_name().ok_or_else(|| {
        FoamError::InvalidRequirement(format!("mesh path has no file name: {}", mesh.path.display()))
    })?;
    let target = case_dir.join(file_name);
    if !target.exists() {
        std::fs::copy(&mesh.path, &target)?;
        info!(mesh = %mesh.path.display(), "custom mesh copied");
    }
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
