//! Sandbox properties checked against the in-memory runtime
//!
//! Covers project root resolution, the fixed sandbox shape, timeout bounds
//! and cleanup, without needing a container engine.

use argus::docker::{
    ContainerSandbox, ImagePullManager, InMemoryRuntime, ProjectRootResolver, PullPolicy,
    ScriptedRun, SandboxSpec, CONTAINER_PROJECT_DIR,
};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn resolver() -> ProjectRootResolver {
    ProjectRootResolver::new(["package.json", "foundry.toml", "hardhat.config.js"])
}

#[test]
fn test_resolves_nearest_marker_directory() {
    let dir = TempDir::new().unwrap();
    let proj = dir.path().join("a/b/proj");
    fs::create_dir_all(proj.join("contracts")).unwrap();
    fs::write(proj.join("package.json"), "{}").unwrap();
    let file = proj.join("contracts/X.sol");
    fs::write(&file, "contract X {}").unwrap();

    assert_eq!(resolver().resolve(&file), proj);
}

#[test]
fn test_loose_file_resolves_to_its_parent() {
    let dir = TempDir::new().unwrap();
    let loose = dir.path().join("loose");
    fs::create_dir_all(&loose).unwrap();
    let file = loose.join("X.sol");
    fs::write(&file, "contract X {}").unwrap();

    assert_eq!(resolver().resolve(&file), loose);
}

#[test]
fn test_spec_rejects_target_outside_root() {
    let result = SandboxSpec::new(
        "tool:latest",
        vec!["run".to_string()],
        "/work/proj",
        "/work/other/X.sol",
        30,
    );
    assert!(result.is_err());

    let spec = SandboxSpec::new(
        "tool:latest",
        vec!["run".to_string()],
        "/work/proj",
        "/work/proj/contracts/X.sol",
        30,
    )
    .unwrap();
    assert!(spec.network_isolated());
    assert!(spec.read_only_mount());
}

#[tokio::test]
async fn test_every_run_is_isolated_and_removed() {
    let runtime = Arc::new(InMemoryRuntime::new().with_image("tool:latest"));
    runtime.push_run(ScriptedRun::success("ok"));
    runtime.push_run(ScriptedRun::failure(2, "compilation failed"));
    let sandbox = ContainerSandbox::new(runtime.clone());

    let spec = SandboxSpec::new(
        "tool:latest",
        vec!["run".to_string(), format!("{}/X.sol", CONTAINER_PROJECT_DIR)],
        "/work/proj",
        "/work/proj/X.sol",
        30,
    )
    .unwrap();

    let first = sandbox.execute(&spec).await.unwrap();
    assert!(first.success);
    assert_eq!(first.stdout, "ok");

    // A non-zero exit is a result, not an error
    let second = sandbox.execute(&spec).await.unwrap();
    assert!(!second.success);
    assert_eq!(second.exit_code, Some(2));
    assert!(second.stderr.contains("compilation failed"));

    let requests = runtime.created_requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert!(request.network_disabled);
        assert!(request.read_only);
        assert_eq!(request.mount_target, CONTAINER_PROJECT_DIR);
    }
    assert_eq!(runtime.live_containers(), 0);
    assert_eq!(runtime.removed_containers(), 2);
}

#[tokio::test]
async fn test_hung_tool_returns_within_bound() {
    let runtime = Arc::new(InMemoryRuntime::new().with_image("tool:latest"));
    runtime.push_run(ScriptedRun::Unresponsive);
    let sandbox = ContainerSandbox::new(runtime.clone())
        .with_margins(Duration::from_millis(300), Duration::from_millis(300));

    let spec = SandboxSpec::new(
        "tool:latest",
        vec!["run".to_string()],
        "/work/proj",
        "/work/proj/X.sol",
        1,
    )
    .unwrap();

    let started = Instant::now();
    let result = sandbox.execute(&spec).await.unwrap();
    let elapsed = started.elapsed();

    assert!(result.timed_out);
    assert!(!result.success);
    assert!(result.exit_code.is_none());
    assert!(elapsed < sandbox.upper_bound(Duration::from_secs(1)) + Duration::from_millis(500));
}

#[tokio::test]
async fn test_pull_policies() {
    let runtime = Arc::new(InMemoryRuntime::new().with_image("local:1"));
    let images = ImagePullManager::new(runtime.clone(), Duration::from_secs(5));

    images.ensure("local:1", PullPolicy::IfNotPresent).await.unwrap();
    assert_eq!(runtime.pull_count(), 0);

    assert!(images.ensure("remote:1", PullPolicy::Never).await.is_err());
    assert_eq!(runtime.pull_count(), 0);

    images.ensure("remote:1", PullPolicy::IfNotPresent).await.unwrap();
    assert!(runtime.has_image("remote:1"));
    assert_eq!(runtime.pull_count(), 1);

    images.ensure("local:1", PullPolicy::Always).await.unwrap();
    assert_eq!(runtime.pull_count(), 2);
}
