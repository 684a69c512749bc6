//! Sandboxed tool execution
//!
//! - [`ProjectRootResolver`]: finds the directory to mount for a file
//! - [`ImagePullManager`]: applies the pull policy before a run
//! - [`ContainerSandbox`]: one isolated, time-bounded container per call
//! - [`ContainerRuntime`]: the engine seam, backed by Docker or kept in memory

mod image;
mod memory;
mod project_root;
mod runtime;
mod sandbox;

pub use image::{ImagePullError, ImagePullManager, PullPolicy};
pub use memory::{InMemoryRuntime, ScriptedRun};
pub use project_root::{ProjectRootResolver, ResolvedRoot};
pub use runtime::{
    check_runtime_available, docker_endpoint_configured, ContainerLogs, ContainerRequest,
    ContainerRuntime, DockerRuntime, RuntimeError,
};
pub use sandbox::{
    ContainerSandbox, ExecutionResult, PathTranslator, SandboxError, SandboxSpec,
    CONTAINER_PROJECT_DIR,
};
