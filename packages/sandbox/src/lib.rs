// ABOUTME: Sandbox provisioning and execution core for Skiff projects
// ABOUTME: Provider abstraction, lifecycle management, persistence and the tool-facing facade

pub mod engine;
pub mod fs;
pub mod manager;
pub mod providers;
pub mod store;
pub mod tools;
pub mod types;

pub use engine::LocalExecutionEngine;
pub use fs::LocalFs;
pub use manager::{ManagerError, SandboxLifecycleManager, SandboxSession};
pub use providers::{
    build_provider, LocalProvider, ProviderError, RemoteProvider, Sandbox, SandboxFs,
    SandboxProcess, SandboxProvider,
};
pub use store::{ProjectStore, SandboxRecord, SqliteProjectStore, StoreError};
pub use tools::{SandboxTools, ToolError};
pub use types::{
    ExecutionResult, FileInfo, PreviewLink, SandboxState, SessionCommand, TIMEOUT_EXIT_CODE,
};
