// ABOUTME: Local execution engine running shell commands and Python scripts with timeouts
// ABOUTME: Provisions per-project virtual environments lazily behind a sentinel-file check

use crate::providers::{ProviderError, Result};
use crate::types::ExecutionResult;
use skiff_workspace::WorkspaceConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Interpreter used to create virtual environments.
const PYTHON_BIN: &str = "python3";

/// Sentinel file whose presence marks an already-provisioned venv.
const VENV_SENTINEL: &str = "pyvenv.cfg";

/// Spawns subprocesses on behalf of local sandboxes.
///
/// Every execution is bounded by a wall-clock budget; exceeding it kills the
/// process and yields the reserved timeout result instead of an error.
#[derive(Clone)]
pub struct LocalExecutionEngine {
    config: Arc<WorkspaceConfig>,
}

impl LocalExecutionEngine {
    pub fn new(config: Arc<WorkspaceConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Run `command` under the configured shell, capturing output as text.
    pub async fn exec(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let cwd = cwd.unwrap_or(&self.config.workspace_root);
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c").arg(command).current_dir(cwd);
        self.run_bounded(cmd, timeout).await
    }

    /// Execute a Python snippet inside the project's virtual environment.
    ///
    /// The venv is provisioned on first use; `requirements` are installed
    /// before the script runs and an installation failure short-circuits with
    /// the installer's result.
    pub async fn run_python(
        &self,
        code: &str,
        project_id: &str,
        requirements: Option<&[String]>,
        workdir: Option<&Path>,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let venv = self.ensure_venv(project_id).await?;
        let python = venv.join("bin").join("python");

        let workdir = workdir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.project_dir(project_id));
        fs::create_dir_all(&workdir).await?;

        if let Some(reqs) = requirements.filter(|r| !r.is_empty()) {
            debug!(project = project_id, count = reqs.len(), "installing requirements");
            let mut install = Command::new(&python);
            install
                .args(["-m", "pip", "install", "--disable-pip-version-check", "--no-input"])
                .args(reqs)
                .current_dir(&workdir);
            let result = self.run_bounded(install, timeout).await?;
            if result.exit_code != 0 {
                return Ok(result);
            }
        }

        let script = workdir.join(format!("run_{}.py", uuid::Uuid::new_v4().simple()));
        fs::write(&script, code).await?;

        let mut cmd = Command::new(&python);
        cmd.arg(&script).current_dir(&workdir);
        let result = self.run_bounded(cmd, timeout).await?;

        if let Err(e) = fs::remove_file(&script).await {
            debug!(script = %script.display(), error = %e, "could not remove temp script");
        }

        Ok(result)
    }

    /// Provision the project's virtual environment unless the sentinel file
    /// already marks it as created. Not race-free under true concurrency; the
    /// sentinel check makes re-creation idempotent in the common case.
    pub async fn ensure_venv(&self, project_id: &str) -> Result<PathBuf> {
        let venv = self.config.venv_dir(project_id);
        if fs::try_exists(venv.join(VENV_SENTINEL)).await.unwrap_or(false) {
            return Ok(venv);
        }

        info!(project = project_id, venv = %venv.display(), "provisioning virtual environment");
        fs::create_dir_all(self.config.venvs_dir()).await?;

        let mut cmd = Command::new(PYTHON_BIN);
        cmd.args(["-m", "venv"]).arg(&venv);
        let result = self.run_bounded(cmd, self.config.exec_timeout).await?;
        if result.exit_code != 0 {
            return Err(ProviderError::Platform(format!(
                "virtual environment creation failed for project {project_id}: {}",
                if result.timed_out() { "timed out" } else { result.stderr.trim() }
            )));
        }
        Ok(venv)
    }

    /// Spawn the prepared command and wait for it under `timeout`. A missed
    /// deadline drops the child (killing it) and yields the timeout result.
    async fn run_bounded(&self, mut cmd: Command, timeout: Duration) -> Result<ExecutionResult> {
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(ExecutionResult {
                    exit_code: output.status.code().unwrap_or(-1) as i64,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "execution exceeded its budget; killed");
                Ok(ExecutionResult::timeout())
            }
        }
    }
}
