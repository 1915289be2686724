// ABOUTME: Per-project facade handed to tool implementations
// ABOUTME: Caches the live sandbox session and gates every path behind the containment check

use crate::manager::{ManagerError, SandboxLifecycleManager, SandboxSession};
use skiff_workspace::PathResolver;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Path escapes the project workspace: {0}")]
    PathEscape(String),

    /// Raised by callers whose access check fails before any sandbox work.
    #[error("Access denied to project: {0}")]
    AccessDenied(String),

    #[error("Sandbox not initialized for project: {0}")]
    NotInitialized(String),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Sandbox access scoped to a single project, as seen by tools.
///
/// The first call that needs a sandbox provisions or starts it; later calls
/// reuse the cached session. All agent-supplied paths go through the resolver
/// before touching the sandbox filesystem.
pub struct SandboxTools {
    project_id: String,
    manager: Arc<SandboxLifecycleManager>,
    resolver: PathResolver,
    session: RwLock<Option<SandboxSession>>,
}

impl SandboxTools {
    pub fn new(
        project_id: impl Into<String>,
        manager: Arc<SandboxLifecycleManager>,
        resolver: PathResolver,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            manager,
            resolver,
            session: RwLock::new(None),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// The project's sandbox, provisioning it on first use.
    pub async fn ensure_sandbox(&self) -> Result<SandboxSession> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }

        let mut guard = self.session.write().await;
        // A concurrent caller may have won the race while we waited.
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let session = self.manager.ensure_sandbox(&self.project_id).await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// The cached session, if a sandbox was already ensured.
    pub async fn sandbox(&self) -> Result<SandboxSession> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| ToolError::NotInitialized(self.project_id.clone()))
    }

    pub async fn sandbox_id(&self) -> Result<String> {
        Ok(self.sandbox().await?.sandbox_id)
    }

    /// Normalize an agent-supplied path relative to the project directory.
    pub fn clean_path(&self, path: &str) -> String {
        self.resolver.normalize(path, &self.project_id)
    }

    /// Absolute form of a path inside the project directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        self.resolver.resolve_absolute(path, &self.project_id)
    }

    pub fn is_path_safe(&self, path: &str) -> bool {
        self.resolver.is_safe(path, &self.project_id)
    }

    /// Normalize `path` and refuse it when it escapes the project directory.
    /// Every mutating filesystem operation must obtain its path from here.
    pub fn require_safe_path(&self, path: &str) -> Result<String> {
        if !self.is_path_safe(path) {
            warn!(project_id = %self.project_id, path, "rejected path escaping the workspace");
            return Err(ToolError::PathEscape(path.to_string()));
        }
        Ok(self.clean_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LocalProvider;
    use crate::store::SqliteProjectStore;
    use skiff_workspace::{ProviderKind, WorkspaceConfig};
    use sqlx::SqlitePool;

    async fn tools_at(root: &std::path::Path, project_id: &str) -> SandboxTools {
        let config = Arc::new(WorkspaceConfig::new(
            ProviderKind::Local,
            root.to_path_buf(),
        ));
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = SqliteProjectStore::new(pool).await.unwrap();
        store.create_project(project_id).await.unwrap();

        let provider = Arc::new(LocalProvider::new(config.clone()));
        let manager = Arc::new(SandboxLifecycleManager::new(
            config.clone(),
            Arc::new(store),
            provider,
        ));
        SandboxTools::new(project_id, manager, PathResolver::new(config))
    }

    #[tokio::test]
    async fn test_ensure_sandbox_caches_session() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_at(dir.path(), "p1").await;

        let first = tools.ensure_sandbox().await.unwrap();
        let second = tools.ensure_sandbox().await.unwrap();
        assert_eq!(first.sandbox_id, second.sandbox_id);
        assert_eq!(tools.sandbox_id().await.unwrap(), first.sandbox_id);
    }

    #[tokio::test]
    async fn test_sandbox_before_ensure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_at(dir.path(), "p1").await;

        let err = tools.sandbox().await.unwrap_err();
        assert!(matches!(err, ToolError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_require_safe_path_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_at(dir.path(), "p1").await;
        std::fs::create_dir_all(dir.path().join("p1")).unwrap();

        let cleaned = tools.require_safe_path("p1/p1/data/file.txt").unwrap();
        assert_eq!(cleaned, "data/file.txt");
    }

    #[tokio::test]
    async fn test_require_safe_path_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools_at(dir.path(), "p1").await;
        std::fs::create_dir_all(dir.path().join("p1")).unwrap();

        let err = tools.require_safe_path("../../etc/shadow").unwrap_err();
        assert!(matches!(err, ToolError::PathEscape(_)));
    }
}
