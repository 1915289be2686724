// ABOUTME: Integration tests for the local provider against a real filesystem
// ABOUTME: Exercises command execution, timeouts and Python venv provisioning end to end

use skiff_sandbox::providers::local::LocalSandbox;
use skiff_sandbox::{LocalProvider, SandboxProvider};
use skiff_workspace::{ProviderKind, WorkspaceConfig};
use std::sync::Arc;
use std::time::Duration;

fn config_at(root: &std::path::Path) -> Arc<WorkspaceConfig> {
    Arc::new(
        WorkspaceConfig::new(ProviderKind::Local, root.to_path_buf())
            .with_exec_timeout(Duration::from_secs(60)),
    )
}

/// Check if a Python interpreter is available for venv tests
fn is_python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_exec_and_fs_share_the_project_directory() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalProvider::new(config_at(dir.path()));
    let sandbox = provider.create("secret", Some("proj")).await.unwrap();

    let result = sandbox
        .exec("echo hello > greeting.txt", None, Some(10))
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0);

    let data = sandbox.fs().download_file("greeting.txt").await.unwrap();
    assert_eq!(data, b"hello\n");
}

#[tokio::test]
async fn test_exec_timeout_yields_structured_result() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalProvider::new(config_at(dir.path()));
    let sandbox = provider.create("secret", Some("proj")).await.unwrap();

    let result = sandbox.exec("sleep 30", None, Some(1)).await.unwrap();
    assert_eq!(result.exit_code, 124);
    assert_eq!(result.stdout, "");
    assert_eq!(result.stderr, "timeout");
}

#[tokio::test]
async fn test_get_or_start_reopens_the_same_directory() {
    let dir = tempfile::tempdir().unwrap();
    let provider = LocalProvider::new(config_at(dir.path()));

    let first = provider.create("secret", Some("proj")).await.unwrap();
    first
        .fs()
        .upload_file(b"persisted", "state.txt")
        .await
        .unwrap();
    drop(first);

    let second = provider.get_or_start("proj").await.unwrap();
    let data = second.fs().download_file("state.txt").await.unwrap();
    assert_eq!(data, b"persisted");
}

#[tokio::test]
async fn test_run_python_in_project_venv() {
    if !is_python_available() {
        println!("Skipping test: python3 not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let config = config_at(dir.path());
    let sandbox = LocalSandbox::new("proj".to_string(), config.clone())
        .await
        .unwrap();

    let result = sandbox
        .run_python("import sys; print(sys.prefix)", None, Some(120))
        .await
        .unwrap();
    assert_eq!(result.exit_code, 0, "stderr: {}", result.stderr);
    // The interpreter must come from the project's venv, not the system.
    assert!(result
        .stdout
        .trim_end()
        .starts_with(&*config.venv_dir("proj").to_string_lossy()));
}

#[tokio::test]
async fn test_run_python_venv_is_reused() {
    if !is_python_available() {
        println!("Skipping test: python3 not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let config = config_at(dir.path());
    let sandbox = LocalSandbox::new("proj".to_string(), config.clone())
        .await
        .unwrap();

    sandbox
        .run_python("print('first')", None, Some(120))
        .await
        .unwrap();

    let marker = config.venv_dir("proj").join("marker");
    std::fs::write(&marker, b"x").unwrap();

    // A second run must not re-create the venv.
    sandbox
        .run_python("print('second')", None, Some(120))
        .await
        .unwrap();
    assert!(marker.is_file());
}

#[tokio::test]
async fn test_run_python_cleans_up_script_file() {
    if !is_python_available() {
        println!("Skipping test: python3 not available");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let sandbox = LocalSandbox::new("proj".to_string(), config_at(dir.path()))
        .await
        .unwrap();

    let result = sandbox.run_python("print(1+1)", None, Some(120)).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "2\n");

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("proj"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".py"))
        .collect();
    assert!(leftovers.is_empty(), "script file was not removed");
}
