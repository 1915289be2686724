// ABOUTME: Workspace configuration and path safety layer for Skiff sandboxes
// ABOUTME: Resolves agent-supplied paths against per-project directories and gates escapes

pub mod config;
pub mod paths;

pub use config::{ConfigError, ProviderKind, RemotePlatformConfig, WorkspaceConfig};
pub use paths::PathResolver;
