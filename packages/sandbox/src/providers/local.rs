// ABOUTME: Local provider running commands as host subprocesses under the workspace root
// ABOUTME: Single-user development backend; no container platform involved

use crate::engine::LocalExecutionEngine;
use crate::fs::LocalFs;
use crate::providers::{Result, Sandbox, SandboxFs, SandboxProcess, SandboxProvider};
use crate::types::{ExecutionResult, PreviewLink, SandboxState, SessionCommand};
use async_trait::async_trait;
use skiff_workspace::{ProviderKind, WorkspaceConfig};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

const STATE_RUNNING: u8 = 0;
const STATE_ARCHIVED: u8 = 1;

/// Provider backed by host subprocesses. Sandbox identity equals the project
/// identity, so one sandbox exists per project directory.
pub struct LocalProvider {
    config: Arc<WorkspaceConfig>,
}

impl LocalProvider {
    pub fn new(config: Arc<WorkspaceConfig>) -> Self {
        Self { config }
    }

    async fn open(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>> {
        let sandbox = LocalSandbox::new(sandbox_id.to_string(), self.config.clone()).await?;
        Ok(Arc::new(sandbox))
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn get_or_start(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>> {
        // Host processes have nothing to start; opening the sandbox is enough.
        self.open(sandbox_id).await
    }

    async fn create(&self, _secret: &str, project_id: Option<&str>) -> Result<Arc<dyn Sandbox>> {
        let id = project_id.unwrap_or("default");
        info!(sandbox_id = id, "creating local sandbox");
        self.open(id).await
    }

    /// Deleting a local sandbox never removes project files; the directory is
    /// the user's working tree.
    async fn delete(&self, sandbox_id: &str) -> Result<bool> {
        info!(sandbox_id, "local sandbox deleted (project files retained)");
        Ok(true)
    }
}

/// A project directory treated as an execution environment.
pub struct LocalSandbox {
    id: String,
    config: Arc<WorkspaceConfig>,
    engine: LocalExecutionEngine,
    fs: LocalFs,
    process: LocalProcessApi,
    state: AtomicU8,
}

impl LocalSandbox {
    pub async fn new(id: String, config: Arc<WorkspaceConfig>) -> Result<Self> {
        let project_dir = config.project_dir(&id);
        fs::create_dir_all(&project_dir).await?;
        fs::create_dir_all(config.venvs_dir()).await?;

        let engine = LocalExecutionEngine::new(config.clone());
        Ok(Self {
            fs: LocalFs::new(project_dir.clone()),
            process: LocalProcessApi::new(engine.clone(), project_dir),
            id,
            config,
            engine,
            state: AtomicU8::new(STATE_RUNNING),
        })
    }

    pub fn engine(&self) -> &LocalExecutionEngine {
        &self.engine
    }

    fn project_dir(&self) -> PathBuf {
        self.config.project_dir(&self.id)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> Result<SandboxState> {
        Ok(match self.state.load(Ordering::SeqCst) {
            STATE_ARCHIVED => SandboxState::Archived,
            _ => SandboxState::Running,
        })
    }

    fn fs(&self) -> &dyn SandboxFs {
        &self.fs
    }

    fn process(&self) -> &dyn SandboxProcess {
        &self.process
    }

    async fn exec(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout_secs: Option<u64>,
    ) -> Result<ExecutionResult> {
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.exec_timeout);
        let project_dir = self.project_dir();
        let cwd = cwd.unwrap_or(&project_dir);
        self.engine.exec(command, Some(cwd), timeout).await
    }

    /// Local sandboxes expose no external endpoints.
    async fn get_preview_link(&self, port: u16) -> Result<PreviewLink> {
        debug!(port, "preview links are not available for local sandboxes");
        Ok(PreviewLink::empty())
    }

    async fn destroy(&self) -> Result<()> {
        self.state.store(STATE_ARCHIVED, Ordering::SeqCst);
        Ok(())
    }
}

/// Session facade for the local backend. Sessions carry no server-side state
/// here, so creation and deletion are no-ops and every command runs blocking.
pub struct LocalProcessApi {
    engine: LocalExecutionEngine,
    workdir: PathBuf,
}

impl LocalProcessApi {
    pub fn new(engine: LocalExecutionEngine, workdir: PathBuf) -> Self {
        Self { engine, workdir }
    }
}

#[async_trait]
impl SandboxProcess for LocalProcessApi {
    async fn create_session(&self, session_id: &str) -> Result<()> {
        debug!(session_id, "local session created (stateless)");
        Ok(())
    }

    async fn execute_session_command(
        &self,
        session_id: &str,
        command: &str,
        _blocking: bool,
    ) -> Result<SessionCommand> {
        debug!(session_id, "running session command locally");
        let result = self
            .engine
            .exec(command, Some(&self.workdir), self.engine.config().exec_timeout)
            .await?;
        Ok(SessionCommand {
            cmd_id: "local".to_string(),
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    /// Output is returned inline by `execute_session_command`; there is no
    /// separate log store to consult.
    async fn get_session_command_logs(&self, _session_id: &str, _cmd_id: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        debug!(session_id, "local session deleted (stateless)");
        Ok(())
    }
}

impl LocalSandbox {
    /// Execute Python code in the project's virtual environment.
    pub async fn run_python(
        &self,
        code: &str,
        requirements: Option<&[String]>,
        timeout_secs: Option<u64>,
    ) -> Result<ExecutionResult> {
        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.exec_timeout);
        self.engine
            .run_python(code, &self.id, requirements, Some(&self.project_dir()), timeout)
            .await
    }
}
