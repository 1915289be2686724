// ABOUTME: Durable sandbox metadata persisted on project records in SQLite
// ABOUTME: The sandbox record is the source of truth linking a project to its sandbox

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Sandbox metadata stored on a project record.
///
/// Absent optional fields are omitted on serialization so records written by
/// older deployments and by the local provider (which has no credentials or
/// preview endpoints) stay byte-compatible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnc_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SandboxRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Persistence seam for sandbox metadata. Implemented over SQLite in
/// production; tests substitute in-memory fakes.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// The stored record for a project, or `None` when the project exists but
    /// has no sandbox yet.
    async fn get_sandbox_record(&self, project_id: &str) -> Result<Option<SandboxRecord>>;

    /// Overwrite the project's sandbox record. The write must be visible to
    /// subsequent reads before this returns.
    async fn put_sandbox_record(&self, project_id: &str, record: &SandboxRecord) -> Result<()>;

    /// Remove the project's sandbox record. Clearing an already-empty record
    /// is not an error.
    async fn clear_sandbox_record(&self, project_id: &str) -> Result<()>;

    /// Reverse lookup: which project owns this sandbox.
    async fn find_project_for_sandbox(&self, sandbox_id: &str) -> Result<Option<String>>;
}

/// SQLite-backed project store. The sandbox record lives as a JSON column on
/// the projects table.
pub struct SqliteProjectStore {
    pool: SqlitePool,
}

impl SqliteProjectStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                project_id TEXT PRIMARY KEY,
                sandbox TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Register a project with no sandbox yet.
    pub async fn create_project(&self, project_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO projects (project_id, sandbox) VALUES (?1, NULL)")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn get_sandbox_record(&self, project_id: &str) -> Result<Option<SandboxRecord>> {
        let row = sqlx::query("SELECT sandbox FROM projects WHERE project_id = ?1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))?;

        let raw: Option<String> = row.get("sandbox");
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_sandbox_record(&self, project_id: &str, record: &SandboxRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let result = sqlx::query("UPDATE projects SET sandbox = ?1 WHERE project_id = ?2")
            .bind(&json)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ProjectNotFound(project_id.to_string()));
        }
        debug!(project_id, sandbox_id = %record.id, "sandbox record persisted");
        Ok(())
    }

    async fn clear_sandbox_record(&self, project_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE projects SET sandbox = NULL WHERE project_id = ?1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ProjectNotFound(project_id.to_string()));
        }
        debug!(project_id, "sandbox record cleared");
        Ok(())
    }

    async fn find_project_for_sandbox(&self, sandbox_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT project_id FROM projects WHERE json_extract(sandbox, '$.id') = ?1",
        )
        .bind(sandbox_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("project_id")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteProjectStore {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        SqliteProjectStore::new(pool).await.expect("schema init")
    }

    #[tokio::test]
    async fn test_missing_project_is_an_error() {
        let store = memory_store().await;
        let err = store.get_sandbox_record("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_project_without_sandbox_reads_none() {
        let store = memory_store().await;
        store.create_project("p1").await.unwrap();
        assert!(store.get_sandbox_record("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let store = memory_store().await;
        store.create_project("p1").await.unwrap();

        let mut record = SandboxRecord::new("sb-1");
        record.pass = Some("s3cret".to_string());
        record.provider = Some("remote".to_string());
        store.put_sandbox_record("p1", &record).await.unwrap();

        let loaded = store.get_sandbox_record("p1").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_put_overwrites_previous_record() {
        let store = memory_store().await;
        store.create_project("p1").await.unwrap();

        store
            .put_sandbox_record("p1", &SandboxRecord::new("sb-old"))
            .await
            .unwrap();
        store
            .put_sandbox_record("p1", &SandboxRecord::new("sb-new"))
            .await
            .unwrap();

        let loaded = store.get_sandbox_record("p1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "sb-new");
    }

    #[tokio::test]
    async fn test_put_for_unknown_project_fails() {
        let store = memory_store().await;
        let err = store
            .put_sandbox_record("ghost", &SandboxRecord::new("sb-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_clear_record() {
        let store = memory_store().await;
        store.create_project("p1").await.unwrap();
        store
            .put_sandbox_record("p1", &SandboxRecord::new("sb-1"))
            .await
            .unwrap();

        store.clear_sandbox_record("p1").await.unwrap();
        assert!(store.get_sandbox_record("p1").await.unwrap().is_none());

        // Clearing twice stays fine.
        store.clear_sandbox_record("p1").await.unwrap();
    }

    #[tokio::test]
    async fn test_reverse_lookup() {
        let store = memory_store().await;
        store.create_project("p1").await.unwrap();
        store.create_project("p2").await.unwrap();
        store
            .put_sandbox_record("p2", &SandboxRecord::new("sb-42"))
            .await
            .unwrap();

        assert_eq!(
            store.find_project_for_sandbox("sb-42").await.unwrap(),
            Some("p2".to_string())
        );
        assert!(store
            .find_project_for_sandbox("sb-missing")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_optional_fields_omitted_in_json() {
        let record = SandboxRecord::new("sb-1");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"id":"sb-1"}"#);
    }
}
