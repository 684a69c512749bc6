//! Container runtime seam
//!
//! [`ContainerRuntime`] is the narrow set of operations the sandbox needs from
//! a container engine. [`DockerRuntime`] talks to the local Docker daemon via
//! bollard; tests use [`super::InMemoryRuntime`].

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors reported by a container runtime
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The engine could not be reached at all
    #[error("Container runtime unreachable: {0}")]
    Unreachable(String),

    /// The engine does not know the requested image
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Any other engine-side failure
    #[error("Container runtime error: {0}")]
    Api(String),
}

/// Everything needed to create one sandbox container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    pub image: String,
    pub command: Vec<String>,
    /// Host directory bind-mounted into the container
    pub mount_source: PathBuf,
    /// In-container mount point, also the working directory
    pub mount_target: String,
    pub read_only: bool,
    pub network_disabled: bool,
}

/// Captured container output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fast availability probe
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Pulls `image` from its registry (network I/O)
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Creates a container and returns its id
    async fn create_container(&self, request: &ContainerRequest) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Waits for the container to exit and returns its exit code
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Returns whatever output the container has produced so far
    async fn container_logs(&self, id: &str) -> Result<ContainerLogs, RuntimeError>;

    /// Force-removes the container, killing it if it is still running
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    fn name(&self) -> &str;
}

/// Docker engine accessed through bollard
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the local defaults (`DOCKER_HOST` or the unix socket)
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn api_error(e: BollardError) -> RuntimeError {
    match e {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::ImageNotFound(message),
        BollardError::IOError { err } => RuntimeError::Unreachable(err.to_string()),
        BollardError::HyperResponseError { err } => RuntimeError::Unreachable(err.to_string()),
        other => RuntimeError::Api(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(api_error)?;
            if let Some(status) = progress.status {
                debug!(image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn create_container(&self, request: &ContainerRequest) -> Result<String, RuntimeError> {
        let mode = if request.read_only { "ro" } else { "rw" };
        let bind = format!(
            "{}:{}:{}",
            request.mount_source.display(),
            request.mount_target,
            mode
        );

        let config = Config {
            image: Some(request.image.clone()),
            cmd: Some(request.command.clone()),
            working_dir: Some(request.mount_target.clone()),
            network_disabled: Some(request.network_disabled),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                binds: Some(vec![bind]),
                network_mode: request.network_disabled.then(|| "none".to_string()),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: format!("argus-{}", uuid::Uuid::new_v4().simple()),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(api_error)?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(api_error)
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let mut stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(api_error(e)),
            None => Err(RuntimeError::Api(format!(
                "Wait stream for container {} ended without a status",
                id
            ))),
        }
    }

    async fn container_logs(&self, id: &str) -> Result<ContainerLogs, RuntimeError> {
        let mut stream = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut logs = ContainerLogs::default();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(api_error)? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    logs.stdout.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdErr { message } => {
                    logs.stderr.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(logs)
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(api_error)
    }

    fn name(&self) -> &str {
        "docker"
    }
}

/// Checks whether a runtime answers its availability probe within a few seconds
pub async fn check_runtime_available(runtime: &dyn ContainerRuntime) -> Result<(), RuntimeError> {
    match tokio::time::timeout(PROBE_TIMEOUT, runtime.ping()).await {
        Ok(Ok(())) => {
            debug!(runtime = runtime.name(), "Container runtime is available");
            Ok(())
        }
        Ok(Err(e)) => {
            debug!(runtime = runtime.name(), error = %e, "Container runtime probe failed");
            Err(e)
        }
        Err(_) => Err(RuntimeError::Unreachable(format!(
            "{} did not answer within {}s",
            runtime.name(),
            PROBE_TIMEOUT.as_secs()
        ))),
    }
}

/// Quick local check used before connecting: is there a socket or a
/// `DOCKER_HOST` to talk to at all?
pub fn docker_endpoint_configured() -> bool {
    std::env::var_os("DOCKER_HOST").is_some() || Path::new(DOCKER_SOCKET_PATH).exists()
}
