// ABOUTME: Capability traits every sandbox backend implements, plus the provider error taxonomy
// ABOUTME: Selects the concrete backend once at startup from the workspace configuration

use crate::types::{ExecutionResult, FileInfo, PreviewLink, SandboxState, SessionCommand};
use async_trait::async_trait;
use skiff_workspace::{ProviderKind, WorkspaceConfig};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub mod local;
pub mod remote;

pub use local::LocalProvider;
pub use remote::RemoteProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Filesystem capability of a sandbox. Paths are interpreted relative to the
/// sandbox's workspace directory unless already absolute.
#[async_trait]
pub trait SandboxFs: Send + Sync {
    /// Lists entries at exactly the first nesting level beneath `path`.
    async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>>;
    async fn download_file(&self, path: &str) -> Result<Vec<u8>>;
    async fn upload_file(&self, data: &[u8], path: &str) -> Result<()>;
    async fn delete_file(&self, path: &str) -> Result<()>;
    async fn create_folder(&self, path: &str, permissions: &str) -> Result<()>;
    async fn set_file_permissions(&self, path: &str, permissions: &str) -> Result<()>;
    async fn get_file_info(&self, path: &str) -> Result<FileInfo>;
}

/// Long-lived session capability for processes that outlive a single exec.
#[async_trait]
pub trait SandboxProcess: Send + Sync {
    /// Creating a session that already exists is not an error.
    async fn create_session(&self, session_id: &str) -> Result<()>;
    async fn execute_session_command(
        &self,
        session_id: &str,
        command: &str,
        blocking: bool,
    ) -> Result<SessionCommand>;
    async fn get_session_command_logs(&self, session_id: &str, cmd_id: &str) -> Result<String>;
    async fn delete_session(&self, session_id: &str) -> Result<()>;
}

/// A provisioned execution environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;
    async fn state(&self) -> Result<SandboxState>;

    fn fs(&self) -> &dyn SandboxFs;
    fn process(&self) -> &dyn SandboxProcess;

    /// Run a one-shot shell command. A timeout yields the reserved timeout
    /// result rather than an error.
    async fn exec(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout_secs: Option<u64>,
    ) -> Result<ExecutionResult>;

    /// Externally reachable preview for `port`. Providers without previews
    /// return an empty link.
    async fn get_preview_link(&self, port: u16) -> Result<PreviewLink>;

    /// Tear the environment down. Idempotent.
    async fn destroy(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// Backend that provisions and retrieves sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Retrieve an existing sandbox, starting it first if it is stopped or
    /// archived.
    async fn get_or_start(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>>;

    /// Provision a new sandbox. `secret` seeds provider-side credentials such
    /// as the VNC password; `project_id` scopes providers that derive the
    /// sandbox identity from the project.
    async fn create(&self, secret: &str, project_id: Option<&str>) -> Result<Arc<dyn Sandbox>>;

    /// Delete a sandbox. Returns `Ok(true)` when it is gone afterwards,
    /// including when it was already gone.
    async fn delete(&self, sandbox_id: &str) -> Result<bool>;
}

impl std::fmt::Debug for dyn SandboxProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxProvider")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Instantiate the provider named by the configuration. Called once at
/// startup; the choice is never revisited afterwards.
pub fn build_provider(config: Arc<WorkspaceConfig>) -> Result<Arc<dyn SandboxProvider>> {
    info!(provider = config.provider.as_str(), "building sandbox provider");
    match config.provider {
        ProviderKind::Local => Ok(Arc::new(LocalProvider::new(config))),
        ProviderKind::Remote => {
            let remote = config.remote.clone().ok_or_else(|| {
                ProviderError::Config(
                    "remote provider selected but no platform API settings present".to_string(),
                )
            })?;
            Ok(Arc::new(RemoteProvider::new(config, remote)?))
        }
    }
}
