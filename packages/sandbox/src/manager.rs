// ABOUTME: Lifecycle manager reconciling durable sandbox records with provider state
// ABOUTME: Ensures each project has exactly one live sandbox and no orphans on failure

use crate::providers::{ProviderError, Sandbox, SandboxProvider};
use crate::store::{ProjectStore, SandboxRecord, StoreError};
use crate::types::PreviewLink;
use skiff_workspace::{ProviderKind, WorkspaceConfig};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Port serving the VNC preview inside remote sandboxes.
const VNC_PORT: u16 = 6080;
/// Port serving the sandboxed HTTP workspace.
const HTTP_PORT: u16 = 8080;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("No sandbox exists for project: {0}")]
    NoSandbox(String),

    #[error("Sandbox not found: {0}")]
    SandboxNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// A live sandbox together with the credentials tied to it.
#[derive(Clone)]
pub struct SandboxSession {
    pub sandbox_id: String,
    pub secret: Option<String>,
    pub handle: Arc<dyn Sandbox>,
}

impl std::fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSession")
            .field("sandbox_id", &self.sandbox_id)
            .field("secret", &self.secret)
            .finish_non_exhaustive()
    }
}

/// Owns the project-to-sandbox relationship.
///
/// The durable record is the source of truth: a sandbox the store does not
/// know about does not exist as far as projects are concerned, which is why
/// creation persists the record before reporting success and compensates by
/// deleting the fresh sandbox when the write fails.
pub struct SandboxLifecycleManager {
    config: Arc<WorkspaceConfig>,
    store: Arc<dyn ProjectStore>,
    provider: Arc<dyn SandboxProvider>,
}

impl SandboxLifecycleManager {
    pub fn new(
        config: Arc<WorkspaceConfig>,
        store: Arc<dyn ProjectStore>,
        provider: Arc<dyn SandboxProvider>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
        }
    }

    /// Return the project's sandbox, provisioning one if the record is empty
    /// and starting it if it is stopped. Calling this again for the same
    /// project yields the same sandbox identity.
    pub async fn ensure_sandbox(&self, project_id: &str) -> Result<SandboxSession> {
        match self.record_for(project_id).await? {
            Some(record) => self.attach_existing(project_id, record).await,
            None => self.provision(project_id).await,
        }
    }

    /// The project's sandbox if one exists, without provisioning.
    pub async fn current_sandbox(&self, project_id: &str) -> Result<SandboxSession> {
        match self.record_for(project_id).await? {
            Some(record) => self.attach_existing(project_id, record).await,
            None => Err(ManagerError::NoSandbox(project_id.to_string())),
        }
    }

    /// Resolve a bare sandbox id back to its session via the owning project.
    pub async fn get_sandbox_by_id(&self, sandbox_id: &str) -> Result<SandboxSession> {
        let project_id = self
            .store
            .find_project_for_sandbox(sandbox_id)
            .await?
            .ok_or_else(|| ManagerError::SandboxNotFound(sandbox_id.to_string()))?;
        self.ensure_sandbox(&project_id).await
    }

    /// Delete the project's sandbox and clear its record. Returns false when
    /// there was nothing to delete; repeated calls are safe.
    pub async fn delete_sandbox(&self, project_id: &str) -> Result<bool> {
        let record = match self.record_for(project_id).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        self.provider.delete(&record.id).await?;
        self.store.clear_sandbox_record(project_id).await?;
        info!(project_id, sandbox_id = %record.id, "sandbox deleted");
        Ok(true)
    }

    /// A missing project is its own error; any other store failure stays a
    /// persistence error.
    async fn record_for(&self, project_id: &str) -> Result<Option<SandboxRecord>> {
        match self.store.get_sandbox_record(project_id).await {
            Ok(record) => Ok(record),
            Err(StoreError::ProjectNotFound(p)) => Err(ManagerError::ProjectNotFound(p)),
            Err(e) => Err(e.into()),
        }
    }

    async fn attach_existing(
        &self,
        project_id: &str,
        mut record: SandboxRecord,
    ) -> Result<SandboxSession> {
        // Older records predate the provider tag; fill it in without ever
        // overwriting an existing value. A failed backfill is not fatal.
        if record.provider.is_none() {
            record.provider = Some(self.config.provider.as_str().to_string());
            if let Err(e) = self.store.put_sandbox_record(project_id, &record).await {
                warn!(project_id, error = %e, "could not backfill provider tag");
            }
        }

        let handle = self.provider.get_or_start(&record.id).await?;
        Ok(SandboxSession {
            sandbox_id: record.id,
            secret: record.pass,
            handle,
        })
    }

    async fn provision(&self, project_id: &str) -> Result<SandboxSession> {
        let secret = uuid::Uuid::new_v4().simple().to_string();
        info!(project_id, "provisioning new sandbox");

        let handle = self.provider.create(&secret, Some(project_id)).await?;
        let sandbox_id = handle.id().to_string();

        let mut record = SandboxRecord::new(&sandbox_id);
        record.provider = Some(self.config.provider.as_str().to_string());
        if self.config.provider == ProviderKind::Remote {
            record.pass = Some(secret.clone());
            self.fill_preview_links(&handle, &mut record).await;
        }

        if let Err(e) = self.store.put_sandbox_record(project_id, &record).await {
            // Without a durable record the sandbox would leak; tear it down.
            warn!(project_id, sandbox_id = %sandbox_id, error = %e, "record write failed; deleting fresh sandbox");
            if let Err(del) = self.provider.delete(&sandbox_id).await {
                warn!(sandbox_id = %sandbox_id, error = %del, "compensating delete failed; sandbox may be orphaned");
            }
            return Err(e.into());
        }

        Ok(SandboxSession {
            sandbox_id,
            secret: record.pass,
            handle,
        })
    }

    /// Preview links are a convenience; failing to fetch them never fails
    /// provisioning.
    async fn fill_preview_links(&self, handle: &Arc<dyn Sandbox>, record: &mut SandboxRecord) {
        match handle.get_preview_link(VNC_PORT).await {
            Ok(PreviewLink { url, token }) => {
                record.vnc_preview = url;
                record.token = token;
            }
            Err(e) => warn!(sandbox_id = handle.id(), error = %e, "no VNC preview link"),
        }
        match handle.get_preview_link(HTTP_PORT).await {
            Ok(PreviewLink { url, .. }) => record.sandbox_url = url,
            Err(e) => warn!(sandbox_id = handle.id(), error = %e, "no HTTP preview link"),
        }
    }
}
