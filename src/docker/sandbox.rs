//! Ephemeral, isolated container execution
//!
//! One [`ContainerSandbox::execute`] call creates exactly one container from a
//! [`SandboxSpec`]: the project root is bind-mounted read-only at
//! [`CONTAINER_PROJECT_DIR`], networking is disabled, and the command runs
//! under a wall-clock bound. The container is force-removed on every exit path.

use super::runtime::{ContainerLogs, ContainerRequest, ContainerRuntime, RuntimeError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Fixed in-container location of the project mount
pub const CONTAINER_PROJECT_DIR: &str = "/project";

const LOG_CAPTURE_MARGIN: Duration = Duration::from_secs(5);
const CLEANUP_MARGIN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    /// The spec violates the sandbox shape
    #[error("Invalid sandbox spec: {0}")]
    InvalidSpec(String),

    /// The runtime could not be reached
    #[error("Sandbox runtime unavailable: {0}")]
    Unavailable(String),

    /// The runtime refused to create or start the container
    #[error("Sandbox setup failed: {0}")]
    Setup(String),
}

impl SandboxError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SandboxError::Unavailable(_) | SandboxError::Setup(_))
    }
}

impl From<RuntimeError> for SandboxError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Unreachable(msg) => SandboxError::Unavailable(msg),
            other => SandboxError::Setup(other.to_string()),
        }
    }
}

/// One sandboxed invocation
///
/// Network isolation and the read-only mount are not options: every spec
/// describes the same sandbox shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    image: String,
    command: Vec<String>,
    project_root: PathBuf,
    target_file: PathBuf,
    timeout_seconds: u64,
}

impl SandboxSpec {
    pub fn new(
        image: impl Into<String>,
        command: Vec<String>,
        project_root: impl Into<PathBuf>,
        target_file: impl Into<PathBuf>,
        timeout_seconds: u64,
    ) -> Result<Self, SandboxError> {
        let image = image.into();
        let project_root = project_root.into();
        let target_file = target_file.into();

        if image.trim().is_empty() {
            return Err(SandboxError::InvalidSpec("image must not be empty".into()));
        }
        if command.is_empty() {
            return Err(SandboxError::InvalidSpec("command must not be empty".into()));
        }
        if !target_file.starts_with(&project_root) {
            return Err(SandboxError::InvalidSpec(format!(
                "{} is not inside project root {}",
                target_file.display(),
                project_root.display()
            )));
        }
        if timeout_seconds == 0 {
            return Err(SandboxError::InvalidSpec("timeout must be positive".into()));
        }

        Ok(Self {
            image,
            command,
            project_root,
            target_file,
            timeout_seconds,
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn target_file(&self) -> &Path {
        &self.target_file
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn network_isolated(&self) -> bool {
        true
    }

    pub fn read_only_mount(&self) -> bool {
        true
    }
}

/// What one sandbox run produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    /// Output is whatever the runtime flushed before the run was cut short
    pub partial_output: bool,
}

impl ExecutionResult {
    fn completed(exit_code: i64, logs: ContainerLogs) -> Self {
        Self {
            success: exit_code == 0,
            stdout: logs.stdout,
            stderr: logs.stderr,
            exit_code: Some(exit_code),
            timed_out: false,
            partial_output: false,
        }
    }

    fn timed_out(logs: ContainerLogs) -> Self {
        Self {
            success: false,
            stdout: logs.stdout,
            stderr: logs.stderr,
            exit_code: None,
            timed_out: true,
            partial_output: true,
        }
    }
}

/// Maps paths between the host and the container mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    host_root: PathBuf,
}

impl PathTranslator {
    pub fn new(host_root: impl Into<PathBuf>) -> Self {
        Self {
            host_root: host_root.into(),
        }
    }

    /// Picks the mount root for `target`: `resolved_root` when it contains the
    /// target, otherwise the target's own parent directory
    pub fn for_target(resolved_root: &Path, target: &Path) -> Self {
        if target.starts_with(resolved_root) {
            return Self::new(resolved_root);
        }
        let parent = target.parent().unwrap_or(resolved_root);
        warn!(
            target = %target.display(),
            root = %resolved_root.display(),
            fallback = %parent.display(),
            "Target is outside the resolved project root, mounting its directory instead"
        );
        Self::new(parent)
    }

    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// Host path under the root to its in-container path
    pub fn to_container(&self, host_path: &Path) -> Option<String> {
        let relative = host_path.strip_prefix(&self.host_root).ok()?;
        let mut container = String::from(CONTAINER_PROJECT_DIR);
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    container.push('/');
                    container.push_str(&part.to_string_lossy());
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(container)
    }

    /// In-container path back to the host path
    pub fn to_host(&self, container_path: &str) -> Option<PathBuf> {
        let relative = container_path.strip_prefix(CONTAINER_PROJECT_DIR)?;
        if !(relative.is_empty() || relative.starts_with('/')) {
            return None;
        }
        let mut host = self.host_root.clone();
        for part in relative.split('/').filter(|p| !p.is_empty()) {
            if part == ".." {
                return None;
            }
            host.push(part);
        }
        Some(host)
    }

    /// Rewrites every argument that names a host path under the root
    pub fn translate_args(&self, args: &[String]) -> Vec<String> {
        args.iter()
            .map(|arg| {
                let path = Path::new(arg);
                if path.is_absolute() {
                    self.to_container(path).unwrap_or_else(|| arg.clone())
                } else {
                    arg.clone()
                }
            })
            .collect()
    }
}

/// Executes one command per call in a fresh container
pub struct ContainerSandbox {
    runtime: Arc<dyn ContainerRuntime>,
    log_capture_margin: Duration,
    cleanup_margin: Duration,
}

impl ContainerSandbox {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            log_capture_margin: LOG_CAPTURE_MARGIN,
            cleanup_margin: CLEANUP_MARGIN,
        }
    }

    /// Overrides the bounds applied after the command's own timeout
    pub fn with_margins(mut self, log_capture: Duration, cleanup: Duration) -> Self {
        self.log_capture_margin = log_capture;
        self.cleanup_margin = cleanup;
        self
    }

    /// Longest time `execute` can take for a given command timeout
    pub fn upper_bound(&self, command_timeout: Duration) -> Duration {
        command_timeout + self.log_capture_margin + self.cleanup_margin
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Runs `spec` to completion, timeout or failure
    ///
    /// Returns within [`Self::upper_bound`] of the command timeout even when the
    /// runtime stops answering. Cleanup failures are logged and never replace
    /// the result.
    pub async fn execute(&self, spec: &SandboxSpec) -> Result<ExecutionResult, SandboxError> {
        let started = Instant::now();
        let deadline = started + spec.timeout();
        let translator = PathTranslator::new(spec.project_root());

        let request = ContainerRequest {
            image: spec.image().to_string(),
            command: spec.command().to_vec(),
            mount_source: translator.host_root().to_path_buf(),
            mount_target: CONTAINER_PROJECT_DIR.to_string(),
            read_only: spec.read_only_mount(),
            network_disabled: spec.network_isolated(),
        };

        info!(
            image = spec.image(),
            command = ?spec.command(),
            root = %spec.project_root().display(),
            timeout_secs = spec.timeout_seconds(),
            "Starting sandbox"
        );

        let id = match bounded(deadline, self.runtime.create_container(&request)).await {
            Some(Ok(id)) => id,
            Some(Err(e)) => return Err(e.into()),
            None => {
                warn!(
                    image = spec.image(),
                    "Container creation did not finish before the deadline"
                );
                return Ok(ExecutionResult::timed_out(ContainerLogs::default()));
            }
        };
        debug!(container = %id, "Container created");

        let outcome = self.run_created(&id, deadline, spec).await;
        self.cleanup(&id).await;

        debug!(
            container = %id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sandbox finished"
        );
        outcome
    }

    async fn run_created(
        &self,
        id: &str,
        deadline: Instant,
        spec: &SandboxSpec,
    ) -> Result<ExecutionResult, SandboxError> {
        match bounded(deadline, self.runtime.start_container(id)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(e.into()),
            None => {
                let logs = self.capture_logs(id).await;
                return Ok(ExecutionResult::timed_out(logs));
            }
        }

        match bounded(deadline, self.runtime.wait_container(id)).await {
            Some(Ok(exit_code)) => {
                let logs = self.capture_logs(id).await;
                if exit_code != 0 {
                    warn!(container = %id, exit_code, "Tool exited with non-zero status");
                }
                Ok(ExecutionResult::completed(exit_code, logs))
            }
            Some(Err(e)) => Err(e.into()),
            None => {
                warn!(
                    container = %id,
                    timeout_secs = spec.timeout_seconds(),
                    "Tool exceeded its timeout, capturing partial output"
                );
                let logs = self.capture_logs(id).await;
                Ok(ExecutionResult::timed_out(logs))
            }
        }
    }

    async fn capture_logs(&self, id: &str) -> ContainerLogs {
        match timeout(self.log_capture_margin, self.runtime.container_logs(id)).await {
            Ok(Ok(logs)) => logs,
            Ok(Err(e)) => {
                warn!(container = %id, error = %e, "Failed to capture container logs");
                ContainerLogs::default()
            }
            Err(_) => {
                warn!(container = %id, "Log capture timed out");
                ContainerLogs::default()
            }
        }
    }

    async fn cleanup(&self, id: &str) {
        match timeout(self.cleanup_margin, self.runtime.remove_container(id)).await {
            Ok(Ok(())) => debug!(container = %id, "Container removed"),
            Ok(Err(e)) => warn!(container = %id, error = %e, "Failed to remove container"),
            Err(_) => warn!(container = %id, "Container removal timed out"),
        }
    }
}

/// Awaits `fut` until `deadline`; `None` means the deadline passed first
async fn bounded<F: Future>(deadline: Instant, fut: F) -> Option<F::Output> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    timeout(remaining, fut).await.ok()
}
