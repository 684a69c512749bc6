//! Container-backed tool handlers
//!
//! Each configured `server.tools.<name>` entry becomes one handler that runs
//! `<command> <target> [args...]` in the sandbox, with the target and any
//! absolute host paths in `args` rewritten to the in-container mount.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::ToolError;
use super::schema::{ArgumentSchema, ArgumentType};
use super::trait_def::{Tool, ToolKind};
use crate::config::{ArgusConfig, ToolConfig};
use crate::docker::{
    ContainerRuntime, ContainerSandbox, ExecutionResult, ImagePullError, ImagePullManager,
    PathTranslator, ProjectRootResolver, SandboxSpec,
};
use crate::util::RetryPolicy;

const SLITHER_DESCRIPTION: &str = "Run the Slither static analyzer on a Solidity file or directory. \
    `target` is a path relative to the project root. Pass extra flags in `args`, \
    e.g. [\"--json\", \"-\"] for machine-readable output or [\"--detect\", \"reentrancy-eth\"].";

const MYTHRIL_DESCRIPTION: &str = "Run Mythril symbolic execution on a Solidity file. \
    `target` is a path relative to the project root. Pass extra flags in `args`, \
    e.g. [\"--execution-timeout\", \"60\"]. Output is JSON unless `args` sets -o/--outform.";

/// Sandbox services shared by every container-backed handler
#[derive(Clone)]
pub struct SandboxServices {
    pub resolver: Arc<ProjectRootResolver>,
    pub images: Arc<ImagePullManager>,
    pub sandbox: Arc<ContainerSandbox>,
    pub pull_retry: RetryPolicy,
}

impl SandboxServices {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &ArgusConfig) -> Self {
        Self {
            resolver: Arc::new(ProjectRootResolver::new(
                config.orchestrator.project_markers.clone(),
            )),
            images: Arc::new(ImagePullManager::new(
                runtime.clone(),
                config.server.pull_timeout(),
            )),
            sandbox: Arc::new(ContainerSandbox::new(runtime)),
            pull_retry: config.retry_policy(),
        }
    }
}

pub struct ContainerTool {
    name: String,
    description: String,
    config: ToolConfig,
    base_dir: PathBuf,
    services: SandboxServices,
    schema: ArgumentSchema,
}

impl ContainerTool {
    /// `base_dir` anchors relative targets and bounds which files may be
    /// analyzed
    pub fn new(
        name: impl Into<String>,
        config: ToolConfig,
        base_dir: impl Into<PathBuf>,
        services: SandboxServices,
    ) -> Self {
        let name = name.into();
        let description = match name.as_str() {
            "slither" => SLITHER_DESCRIPTION.to_string(),
            "mythril" => MYTHRIL_DESCRIPTION.to_string(),
            other => format!(
                "Run `{}` in a network-isolated sandbox on a project file. `target` is a path relative to the project root.",
                other
            ),
        };
        let schema = ArgumentSchema::new()
            .required(
                "target",
                ArgumentType::String,
                "File or directory to analyze, relative to the project root",
            )
            .optional_list("args", ArgumentType::String, "Extra command-line arguments");

        Self {
            name,
            description,
            config,
            base_dir: base_dir.into(),
            services,
            schema,
        }
    }

    async fn resolve_target(&self, target: &str) -> Result<PathBuf, ToolError> {
        let base = tokio::fs::canonicalize(&self.base_dir)
            .await
            .map_err(|e| ToolError::NotFound(format!("{}: {}", self.base_dir.display(), e)))?;
        let candidate = Path::new(target);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base.join(candidate)
        };
        let canonical = tokio::fs::canonicalize(&joined)
            .await
            .map_err(|_| ToolError::NotFound(format!("Target does not exist: {}", target)))?;
        if !canonical.starts_with(&base) {
            return Err(ToolError::InvalidArguments(format!(
                "Target {} is outside the analyzed project",
                target
            )));
        }
        Ok(canonical)
    }

    async fn ensure_image(&self) -> Result<(), ToolError> {
        let image = self.config.docker.image.as_str();
        let policy = self.config.docker.pull_policy;
        let images: &ImagePullManager = &self.services.images;
        self.services
            .pull_retry
            .run(
                &format!("pull {}", image),
                None,
                |e: &ImagePullError| e.transient,
                move |_| images.ensure(image, policy),
            )
            .await
            .map_err(ToolError::from)
    }

    fn build_command(
        &self,
        container_target: String,
        translator: &PathTranslator,
        args: &[String],
    ) -> Vec<String> {
        let mut command = self.config.command.clone();
        command.push(container_target);
        command.extend(translator.translate_args(args));
        if let Some(ref outform) = self.config.outform {
            let chosen = args
                .iter()
                .any(|a| a == "-o" || a == "--outform" || a.starts_with("--outform="));
            if !chosen {
                command.push("-o".to_string());
                command.push(outform.clone());
            }
        }
        command
    }

    fn payload(&self, target: &str, command: &[String], result: &ExecutionResult) -> Value {
        json!({
            "tool": self.name,
            "target": target,
            "command": command,
            "exit_code": result.exit_code,
            "timed_out": result.timed_out,
            "partial_output": result.partial_output,
            "stdout": parse_output(&result.stdout),
            "stderr": parse_output(&result.stderr),
        })
    }
}

/// Tool output as JSON when it is JSON, else as text
fn parse_output(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[async_trait]
impl Tool for ContainerTool {
    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Container
    }

    fn schema(&self) -> &ArgumentSchema {
        &self.schema
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let target_arg = arguments
            .get("target")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("'target' is required".into()))?;
        let args: Vec<String> = arguments
            .get("args")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let target = self.resolve_target(target_arg).await?;
        self.ensure_image().await?;

        let resolved = self.services.resolver.resolve(&target);
        let translator = PathTranslator::for_target(&resolved, &target);
        let container_target = translator.to_container(&target).ok_or_else(|| {
            ToolError::InvalidArguments(format!("Cannot map {} into the sandbox", target.display()))
        })?;

        let command = self.build_command(container_target, &translator, &args);
        debug!(tool = %self.name, command = ?command, "Built sandbox command");

        let spec = SandboxSpec::new(
            self.config.docker.image.clone(),
            command.clone(),
            translator.host_root(),
            &target,
            self.config.timeout,
        )?;
        let result = self.services.sandbox.execute(&spec).await?;
        let payload = self.payload(target_arg, &command, &result);

        if result.timed_out {
            return Err(ToolError::Timeout {
                seconds: self.config.timeout,
                partial: payload,
            });
        }
        if !result.success {
            return Err(ToolError::ExecutionFailed {
                exit_code: result.exit_code,
                payload,
            });
        }

        info!(tool = %self.name, target = target_arg, "Sandbox run succeeded");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{InMemoryRuntime, PullPolicy, ScriptedRun};
    use crate::error::ErrorKind;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const IMAGE: &str = "mythril/myth:latest";

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::create_dir(dir.path().join("contracts")).unwrap();
        fs::write(dir.path().join("contracts/Vault.sol"), "contract Vault {}").unwrap();
        dir
    }

    fn services(runtime: Arc<InMemoryRuntime>) -> SandboxServices {
        SandboxServices {
            resolver: Arc::new(ProjectRootResolver::new(
                ArgusConfig::default().orchestrator.project_markers,
            )),
            images: Arc::new(ImagePullManager::new(runtime.clone(), Duration::from_secs(5))),
            sandbox: Arc::new(
                ContainerSandbox::new(runtime)
                    .with_margins(Duration::from_millis(100), Duration::from_millis(100)),
            ),
            pull_retry: RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
        }
    }

    fn mythril(dir: &TempDir, runtime: Arc<InMemoryRuntime>) -> ContainerTool {
        let config = ArgusConfig::default().tool_config("mythril").unwrap().clone();
        ContainerTool::new("mythril", config, dir.path(), services(runtime))
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_runs_with_translated_target_and_outform() {
        let dir = project();
        let runtime = Arc::new(InMemoryRuntime::new().with_image(IMAGE));
        runtime.push_run(ScriptedRun::success("{\"issues\": []}"));
        let tool = mythril(&dir, runtime.clone());

        let payload = tool
            .execute(args(json!({"target": "contracts/Vault.sol"})))
            .await
            .unwrap();

        assert_eq!(payload["stdout"]["issues"], json!([]));
        let request = &runtime.created_requests()[0];
        assert_eq!(
            request.command,
            vec!["myth", "analyze", "/project/contracts/Vault.sol", "-o", "json"]
        );
        assert!(request.read_only);
        assert!(request.network_disabled);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_caller_outform_wins() {
        let dir = project();
        let runtime = Arc::new(InMemoryRuntime::new().with_image(IMAGE));
        runtime.push_run(ScriptedRun::success("text report"));
        let tool = mythril(&dir, runtime.clone());

        let payload = tool
            .execute(args(json!({"target": "contracts/Vault.sol", "args": ["-o", "text"]})))
            .await
            .unwrap();

        assert_eq!(payload["stdout"], "text report");
        let command = &runtime.created_requests()[0].command;
        assert_eq!(command.iter().filter(|a| *a == "-o").count(), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_execution_failure() {
        let dir = project();
        let runtime = Arc::new(InMemoryRuntime::new().with_image(IMAGE));
        runtime.push_run(ScriptedRun::failure(1, "compilation failed"));
        let tool = mythril(&dir, runtime);

        let err = tool
            .execute(args(json!({"target": "contracts/Vault.sol"})))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ToolExecutionFailure);
        assert_eq!(err.partial_payload().unwrap()["stderr"], "compilation failed");
    }

    #[tokio::test]
    async fn test_missing_and_escaping_targets() {
        let dir = project();
        let runtime = Arc::new(InMemoryRuntime::new().with_image(IMAGE));
        let tool = mythril(&dir, runtime.clone());

        let missing = tool
            .execute(args(json!({"target": "contracts/Nope.sol"})))
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let outside = TempDir::new().unwrap();
        let stray = outside.path().join("X.sol");
        fs::write(&stray, "").unwrap();
        let escaped = tool
            .execute(args(json!({"target": stray.to_string_lossy()})))
            .await
            .unwrap_err();
        assert_eq!(escaped.kind(), ErrorKind::InvalidArguments);
        assert!(runtime.created_requests().is_empty());
    }

    #[tokio::test]
    async fn test_never_policy_with_absent_image() {
        let dir = project();
        let runtime = Arc::new(InMemoryRuntime::new());
        let mut config = ArgusConfig::default().tool_config("slither").unwrap().clone();
        config.docker.pull_policy = PullPolicy::Never;
        let tool = ContainerTool::new("slither", config, dir.path(), services(runtime.clone()));

        let err = tool
            .execute(args(json!({"target": "contracts/Vault.sol"})))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ImagePullFailure);
        assert_eq!(runtime.pull_count(), 0);
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(parse_output("{\"a\":1}\n"), json!({"a": 1}));
        assert_eq!(parse_output("plain"), json!("plain"));
        assert_eq!(parse_output("  "), json!(""));
    }
}
