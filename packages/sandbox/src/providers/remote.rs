// ABOUTME: Remote provider backed by the container platform's REST API
// ABOUTME: Thin HTTP client plus sandbox, fs and process adapters over the wire contract

use crate::providers::{
    ProviderError, Result, Sandbox, SandboxFs, SandboxProcess, SandboxProvider,
};
use crate::types::{ExecutionResult, FileInfo, PreviewLink, SandboxState, SessionCommand};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use skiff_workspace::{ProviderKind, RemotePlatformConfig, WorkspaceConfig};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Well-known session kept alive on every remote sandbox for supervised
/// long-running processes.
pub const SUPERVISOR_SESSION: &str = "supervisord-session";

/// Minutes of inactivity before the platform stops, then archives, a sandbox.
const AUTO_STOP_MINUTES: u32 = 15;
const AUTO_ARCHIVE_MINUTES: u32 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxInfo {
    pub id: String,
    pub state: SandboxState,
}

#[derive(Debug, Serialize)]
struct CreateSandboxRequest {
    snapshot: String,
    public: bool,
    labels: HashMap<String, String>,
    env_vars: HashMap<String, String>,
    auto_stop_interval: u32,
    auto_archive_interval: u32,
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cwd: Option<&'a str>,
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    session_id: &'a str,
}

#[derive(Debug, Serialize)]
struct SessionExecRequest<'a> {
    command: &'a str,
    blocking: bool,
}

#[derive(Debug, Serialize)]
struct PathPermissionsRequest<'a> {
    path: &'a str,
    permissions: &'a str,
}

/// HTTP client for the container platform API.
pub struct PlatformClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl PlatformClient {
    pub fn new(platform: &RemotePlatformConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: platform.api_url.trim_end_matches('/').to_string(),
            api_key: platform.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into the matching error, consuming the body
    /// for the message.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_else(|_| status.to_string());
        match status {
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(body)),
            _ => Err(ProviderError::Platform(format!("{status}: {body}"))),
        }
    }

    pub async fn get_sandbox(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        let response = self
            .http
            .get(self.url(&format!("/sandboxes/{sandbox_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn start_sandbox(&self, sandbox_id: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/start")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn create_sandbox(&self, request: &CreateSandboxRequest) -> Result<SandboxInfo> {
        let response = self
            .http
            .post(self.url("/sandboxes"))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Returns true when the sandbox is gone afterwards; an already-missing
    /// sandbox counts as deleted.
    pub async fn delete_sandbox(&self, sandbox_id: &str) -> Result<bool> {
        let response = self
            .http
            .delete(self.url(&format!("/sandboxes/{sandbox_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(sandbox_id, "sandbox already absent on delete");
            return Ok(true);
        }
        Self::check(response).await?;
        Ok(true)
    }

    pub async fn exec(
        &self,
        sandbox_id: &str,
        command: &str,
        cwd: Option<&str>,
        timeout_secs: u64,
    ) -> Result<ExecutionResult> {
        let response = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/exec")))
            .bearer_auth(&self.api_key)
            .json(&ExecRequest {
                command,
                cwd,
                timeout_secs,
            })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn preview_link(&self, sandbox_id: &str, port: u16) -> Result<PreviewLink> {
        let response = self
            .http
            .get(self.url(&format!("/sandboxes/{sandbox_id}/preview/{port}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn list_files(&self, sandbox_id: &str, path: &str) -> Result<Vec<FileInfo>> {
        let response = self
            .http
            .get(self.url(&format!("/sandboxes/{sandbox_id}/files")))
            .bearer_auth(&self.api_key)
            .query(&[("path", path)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn download_file(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(self.url(&format!("/sandboxes/{sandbox_id}/files/download")))
            .bearer_auth(&self.api_key)
            .query(&[("path", path)])
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?.to_vec())
    }

    pub async fn upload_file(&self, sandbox_id: &str, path: &str, data: &[u8]) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/files/upload")))
            .bearer_auth(&self.api_key)
            .query(&[("path", path)])
            .body(data.to_vec())
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn delete_file(&self, sandbox_id: &str, path: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/sandboxes/{sandbox_id}/files")))
            .bearer_auth(&self.api_key)
            .query(&[("path", path)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn create_folder(
        &self,
        sandbox_id: &str,
        path: &str,
        permissions: &str,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/files/folder")))
            .bearer_auth(&self.api_key)
            .json(&PathPermissionsRequest { path, permissions })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn set_file_permissions(
        &self,
        sandbox_id: &str,
        path: &str,
        permissions: &str,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/files/permissions")))
            .bearer_auth(&self.api_key)
            .json(&PathPermissionsRequest { path, permissions })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn get_file_info(&self, sandbox_id: &str, path: &str) -> Result<FileInfo> {
        let response = self
            .http
            .get(self.url(&format!("/sandboxes/{sandbox_id}/files/info")))
            .bearer_auth(&self.api_key)
            .query(&[("path", path)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Creating a session that already exists is reported as a conflict by the
    /// platform; that is not an error here.
    pub async fn create_session(&self, sandbox_id: &str, session_id: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/sandboxes/{sandbox_id}/sessions")))
            .bearer_auth(&self.api_key)
            .json(&CreateSessionRequest { session_id })
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            debug!(sandbox_id, session_id, "session already exists");
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    pub async fn execute_session_command(
        &self,
        sandbox_id: &str,
        session_id: &str,
        command: &str,
        blocking: bool,
    ) -> Result<SessionCommand> {
        let response = self
            .http
            .post(self.url(&format!(
                "/sandboxes/{sandbox_id}/sessions/{session_id}/exec"
            )))
            .bearer_auth(&self.api_key)
            .json(&SessionExecRequest { command, blocking })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn get_session_command_logs(
        &self,
        sandbox_id: &str,
        session_id: &str,
        cmd_id: &str,
    ) -> Result<String> {
        let response = self
            .http
            .get(self.url(&format!(
                "/sandboxes/{sandbox_id}/sessions/{session_id}/commands/{cmd_id}/logs"
            )))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.text().await?)
    }

    pub async fn delete_session(&self, sandbox_id: &str, session_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!(
                "/sandboxes/{sandbox_id}/sessions/{session_id}"
            )))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

/// Provider backed by the external container platform.
pub struct RemoteProvider {
    config: Arc<WorkspaceConfig>,
    client: Arc<PlatformClient>,
    snapshot: String,
}

impl RemoteProvider {
    pub fn new(config: Arc<WorkspaceConfig>, platform: RemotePlatformConfig) -> Result<Self> {
        let client = Arc::new(PlatformClient::new(&platform)?);
        Ok(Self {
            config,
            client,
            snapshot: platform.snapshot,
        })
    }

    fn sandbox(&self, info: SandboxInfo) -> Arc<dyn Sandbox> {
        Arc::new(RemoteSandbox::new(info.id, self.client.clone(), self.config.clone()))
    }
}

#[async_trait]
impl SandboxProvider for RemoteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    async fn get_or_start(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>> {
        let mut info = self.client.get_sandbox(sandbox_id).await?;
        if info.state.needs_start() {
            info!(sandbox_id, state = info.state.as_str(), "starting stopped sandbox");
            self.client.start_sandbox(sandbox_id).await?;
            info = self.client.get_sandbox(sandbox_id).await?;
            // The supervisor session does not survive a cold start.
            self.client
                .create_session(sandbox_id, SUPERVISOR_SESSION)
                .await?;
        }
        Ok(self.sandbox(info))
    }

    async fn create(&self, secret: &str, project_id: Option<&str>) -> Result<Arc<dyn Sandbox>> {
        let mut labels = HashMap::new();
        if let Some(project) = project_id {
            labels.insert("id".to_string(), project.to_string());
        }
        let mut env_vars = HashMap::new();
        env_vars.insert("VNC_PASSWORD".to_string(), secret.to_string());

        let info = self
            .client
            .create_sandbox(&CreateSandboxRequest {
                snapshot: self.snapshot.clone(),
                public: true,
                labels,
                env_vars,
                auto_stop_interval: AUTO_STOP_MINUTES,
                auto_archive_interval: AUTO_ARCHIVE_MINUTES,
            })
            .await?;
        info!(sandbox_id = %info.id, snapshot = %self.snapshot, "created remote sandbox");

        self.client
            .create_session(&info.id, SUPERVISOR_SESSION)
            .await?;

        Ok(self.sandbox(info))
    }

    async fn delete(&self, sandbox_id: &str) -> Result<bool> {
        self.client.delete_sandbox(sandbox_id).await
    }
}

/// Handle to a sandbox hosted on the platform.
pub struct RemoteSandbox {
    id: String,
    client: Arc<PlatformClient>,
    config: Arc<WorkspaceConfig>,
    fs: RemoteFs,
    process: RemoteProcess,
}

impl RemoteSandbox {
    fn new(id: String, client: Arc<PlatformClient>, config: Arc<WorkspaceConfig>) -> Self {
        Self {
            fs: RemoteFs {
                sandbox_id: id.clone(),
                client: client.clone(),
            },
            process: RemoteProcess {
                sandbox_id: id.clone(),
                client: client.clone(),
            },
            id,
            client,
            config,
        }
    }
}

#[async_trait]
impl Sandbox for RemoteSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> Result<SandboxState> {
        Ok(self.client.get_sandbox(&self.id).await?.state)
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
        let timeout = timeout_secs.unwrap_or(self.config.exec_timeout.as_secs());
        let cwd = cwd.map(|p| p.to_string_lossy().into_owned());
        self.client
            .exec(&self.id, command, cwd.as_deref(), timeout)
            .await
    }

    async fn get_preview_link(&self, port: u16) -> Result<PreviewLink> {
        self.client.preview_link(&self.id, port).await
    }

    async fn destroy(&self) -> Result<()> {
        self.client.delete_sandbox(&self.id).await?;
        Ok(())
    }
}

struct RemoteFs {
    sandbox_id: String,
    client: Arc<PlatformClient>,
}

#[async_trait]
impl SandboxFs for RemoteFs {
    async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.client.list_files(&self.sandbox_id, path).await
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        self.client.download_file(&self.sandbox_id, path).await
    }

    async fn upload_file(&self, data: &[u8], path: &str) -> Result<()> {
        self.client.upload_file(&self.sandbox_id, path, data).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.client.delete_file(&self.sandbox_id, path).await
    }

    async fn create_folder(&self, path: &str, permissions: &str) -> Result<()> {
        self.client
            .create_folder(&self.sandbox_id, path, permissions)
            .await
    }

    async fn set_file_permissions(&self, path: &str, permissions: &str) -> Result<()> {
        self.client
            .set_file_permissions(&self.sandbox_id, path, permissions)
            .await
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        self.client.get_file_info(&self.sandbox_id, path).await
    }
}

struct RemoteProcess {
    sandbox_id: String,
    client: Arc<PlatformClient>,
}

#[async_trait]
impl SandboxProcess for RemoteProcess {
    async fn create_session(&self, session_id: &str) -> Result<()> {
        self.client.create_session(&self.sandbox_id, session_id).await
    }

    async fn execute_session_command(
        &self,
        session_id: &str,
        command: &str,
        blocking: bool,
    ) -> Result<SessionCommand> {
        self.client
            .execute_session_command(&self.sandbox_id, session_id, command, blocking)
            .await
    }

    async fn get_session_command_logs(&self, session_id: &str, cmd_id: &str) -> Result<String> {
        self.client
            .get_session_command_logs(&self.sandbox_id, session_id, cmd_id)
            .await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.client.delete_session(&self.sandbox_id, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_serialization() {
        let mut labels = HashMap::new();
        labels.insert("id".to_string(), "p1".to_string());
        let request = CreateSandboxRequest {
            snapshot: "skiff-base".to_string(),
            public: true,
            labels,
            env_vars: HashMap::new(),
            auto_stop_interval: AUTO_STOP_MINUTES,
            auto_archive_interval: AUTO_ARCHIVE_MINUTES,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["snapshot"], "skiff-base");
        assert_eq!(value["labels"]["id"], "p1");
        assert_eq!(value["auto_stop_interval"], 15);
        assert_eq!(value["auto_archive_interval"], 30);
    }

    #[test]
    fn test_exec_request_omits_absent_cwd() {
        let request = ExecRequest {
            command: "ls",
            cwd: None,
            timeout_secs: 900,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("cwd").is_none());
    }
}
