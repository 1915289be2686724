// ABOUTME: Environment-derived workspace configuration shared by all sandbox components
// ABOUTME: Read once at process startup and injected; no component re-reads the environment

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default wall-clock budget for a single command execution.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 900;

/// Reserved subdirectory of the workspace root holding per-project venvs.
pub const VENVS_DIR: &str = ".venvs";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown sandbox provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Which backend satisfies the sandbox capability contract.
///
/// Selected once per deployment; variants are never mixed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Remote,
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Connection settings for the external container platform.
#[derive(Debug, Clone)]
pub struct RemotePlatformConfig {
    pub api_url: String,
    pub api_key: String,
    /// Snapshot/image name new sandboxes are created from.
    pub snapshot: String,
}

/// Central configuration for workspace paths and sandbox execution.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub provider: ProviderKind,
    /// Absolute base directory under which all project files live.
    pub workspace_root: PathBuf,
    /// Shell used to interpret `exec` commands.
    pub shell: String,
    /// Default wall-clock budget for command execution.
    pub exec_timeout: Duration,
    /// Present only when the remote provider is configured.
    pub remote: Option<RemotePlatformConfig>,
}

impl WorkspaceConfig {
    pub fn new(provider: ProviderKind, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            workspace_root: strip_trailing_slashes(workspace_root.into()),
            shell: "/bin/sh".to_string(),
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            remote: None,
        }
    }

    /// Load configuration from the environment.
    ///
    /// Recognized variables: `SANDBOX_PROVIDER`, `SANDBOX_WORKSPACE_ROOT`,
    /// `SANDBOX_SHELL`, `SANDBOX_EXEC_TIMEOUT_SEC`, `SANDBOX_API_URL`,
    /// `SANDBOX_API_KEY`, `SANDBOX_SNAPSHOT`. Called once at startup; every
    /// other component receives the resulting value by injection.
    pub fn from_env() -> Result<Self> {
        let provider = match std::env::var("SANDBOX_PROVIDER") {
            Ok(v) => ProviderKind::parse(&v)?,
            Err(_) => ProviderKind::Remote,
        };

        let root = std::env::var("SANDBOX_WORKSPACE_ROOT")
            .unwrap_or_else(|_| "/workspace".to_string());

        let mut config = Self::new(provider, root);

        if let Ok(shell) = std::env::var("SANDBOX_SHELL") {
            config.shell = shell;
        }

        if let Ok(raw) = std::env::var("SANDBOX_EXEC_TIMEOUT_SEC") {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: "SANDBOX_EXEC_TIMEOUT_SEC".to_string(),
                value: raw.clone(),
            })?;
            config.exec_timeout = Duration::from_secs(secs);
        }

        if let Ok(api_url) = std::env::var("SANDBOX_API_URL") {
            config.remote = Some(RemotePlatformConfig {
                api_url: api_url.trim_end_matches('/').to_string(),
                api_key: std::env::var("SANDBOX_API_KEY").unwrap_or_default(),
                snapshot: std::env::var("SANDBOX_SNAPSHOT")
                    .unwrap_or_else(|_| "skiff-base".to_string()),
            });
        }

        debug!(
            provider = config.provider.as_str(),
            root = %config.workspace_root.display(),
            "workspace configuration loaded"
        );

        Ok(config)
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn with_remote(mut self, remote: RemotePlatformConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Directory where a project's files are stored.
    ///
    /// Uniform across providers so the containment gate never depends on the
    /// active variant.
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.workspace_root.join(project_id)
    }

    /// Reserved subdirectory holding per-project virtual environments.
    pub fn venvs_dir(&self) -> PathBuf {
        self.workspace_root.join(VENVS_DIR)
    }

    pub fn venv_dir(&self, project_id: &str) -> PathBuf {
        self.venvs_dir().join(project_id)
    }
}

fn strip_trailing_slashes(path: PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else if trimmed.len() != s.len() {
        PathBuf::from(trimmed)
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::parse("remote").unwrap(), ProviderKind::Remote);
        assert_eq!(ProviderKind::parse("LOCAL").unwrap(), ProviderKind::Local);
        assert!(ProviderKind::parse("docker").is_err());
    }

    #[test]
    fn test_trailing_slash_stripped() {
        let config = WorkspaceConfig::new(ProviderKind::Local, "/workspace/");
        assert_eq!(config.workspace_root, PathBuf::from("/workspace"));

        let config = WorkspaceConfig::new(ProviderKind::Local, "/data/ws///");
        assert_eq!(config.workspace_root, PathBuf::from("/data/ws"));
    }

    #[test]
    fn test_project_dir_layout() {
        let config = WorkspaceConfig::new(ProviderKind::Local, "/workspace");
        assert_eq!(config.project_dir("p1"), PathBuf::from("/workspace/p1"));
        assert_eq!(config.venv_dir("p1"), PathBuf::from("/workspace/.venvs/p1"));
    }

    #[test]
    fn test_defaults() {
        let config = WorkspaceConfig::new(ProviderKind::Remote, "/workspace");
        assert_eq!(config.shell, "/bin/sh");
        assert_eq!(
            config.exec_timeout,
            Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS)
        );
        assert!(config.remote.is_none());
    }
}
