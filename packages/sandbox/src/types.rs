// ABOUTME: Shared data types for sandbox capabilities across both providers
// ABOUTME: Execution results, normalized file listings, sandbox states and preview links

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved exit code meaning "the process was forcibly terminated because its
/// wall-clock budget elapsed". A timeout is a structured result, never an error.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Outcome of a command or script execution inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn timeout() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: "timeout".to_string(),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Normalized listing record, produced uniformly regardless of which provider
/// backs the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SandboxState {
    Running,
    Stopped,
    Archived,
}

impl SandboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Archived => "ARCHIVED",
        }
    }

    /// Whether a provider-side start is required before use.
    pub fn needs_start(&self) -> bool {
        matches!(self, Self::Stopped | Self::Archived)
    }
}

/// Externally reachable preview for a port exposed by a sandbox.
///
/// The local provider has no externally reachable previews; both fields stay
/// empty there.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviewLink {
    pub url: Option<String>,
    pub token: Option<String>,
}

impl PreviewLink {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Result of running a command inside a long-lived session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCommand {
    pub cmd_id: String,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}
