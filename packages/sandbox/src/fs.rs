// ABOUTME: Local filesystem adapter rooted at the workspace directory
// ABOUTME: Implements the provider-neutral fs capability over tokio::fs

use crate::providers::{ProviderError, Result, SandboxFs};
use crate::types::FileInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Filesystem capability for local sandboxes. Paths may arrive absolute
/// (already resolved by the path-safety layer) or relative to the root.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn absolute(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    fn relative_to_root(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    async fn file_info_for(&self, path: &Path) -> Result<FileInfo> {
        let metadata = fs::metadata(path).await?;
        let mod_time: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileInfo {
            name,
            path: self.relative_to_root(path),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            mod_time,
            permissions: Some(format!("{:o}", metadata.permissions().mode() & 0o777)),
        })
    }
}

fn parse_octal_mode(permissions: &str) -> Result<u32> {
    u32::from_str_radix(permissions, 8).map_err(|_| {
        ProviderError::Config(format!("invalid octal permission string: {permissions}"))
    })
}

#[async_trait]
impl SandboxFs for LocalFs {
    /// Lists entries at exactly the first nesting level beneath `path`.
    async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>> {
        let base = self.absolute(path);
        if !fs::try_exists(&base).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&base).await?;
        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            infos.push(self.file_info_for(&entry.path()).await?);
        }
        Ok(infos)
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.absolute(path)).await?)
    }

    async fn upload_file(&self, data: &[u8], path: &str) -> Result<()> {
        let target = self.absolute(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, data).await?;
        debug!(path = %target.display(), bytes = data.len(), "uploaded file");
        Ok(())
    }

    /// Removes a single file, or a directory with all of its contents.
    async fn delete_file(&self, path: &str) -> Result<()> {
        let target = self.absolute(path);
        let metadata = fs::metadata(&target).await?;
        if metadata.is_dir() {
            fs::remove_dir_all(&target).await?;
        } else {
            fs::remove_file(&target).await?;
        }
        debug!(path = %target.display(), "deleted");
        Ok(())
    }

    async fn create_folder(&self, path: &str, permissions: &str) -> Result<()> {
        let target = self.absolute(path);
        fs::create_dir_all(&target).await?;
        let mode = parse_octal_mode(permissions)?;
        fs::set_permissions(&target, std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn set_file_permissions(&self, path: &str, permissions: &str) -> Result<()> {
        let mode = parse_octal_mode(permissions)?;
        fs::set_permissions(self.absolute(path), std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        self.file_info_for(&self.absolute(path)).await
    }
}
