//! Tool dispatch
//!
//! Handlers are registered under a name at startup, producing an immutable
//! [`ToolRegistry`]. [`ToolDispatcher`] is the single entry point used by the
//! orchestrator and by reasoning agents: `invoke(name, arguments)` always
//! returns a [`ToolInvocationResponse`].

pub mod container;
pub mod dispatcher;
pub mod error;
pub mod filesystem;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod trait_def;

pub use container::{ContainerTool, SandboxServices};
pub use dispatcher::{DispatchHandle, ToolDispatcher};
pub use error::ToolError;
pub use filesystem::{ConfinedRoot, FindFilesTool, ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use protocol::{ToolInvocationRequest, ToolInvocationResponse, TRUNCATION_MARKER};
pub use registry::{RegistryError, ToolRegistry, ToolRegistryBuilder};
pub use schema::{ArgumentSchema, ArgumentType};
pub use trait_def::{Tool, ToolKind};

use crate::config::ArgusConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Registers every configured container tool plus the file tools
///
/// Container tools are only registered when `services` is given. The output
/// directory is created on first write.
pub fn standard_registry(
    config: &ArgusConfig,
    project_root: &Path,
    output_dir: &Path,
    services: Option<SandboxServices>,
) -> Result<ToolRegistry, ToolError> {
    let registration = |e: RegistryError| ToolError::Other(e.to_string());
    let project = ConfinedRoot::new(project_root)?;
    let output = ConfinedRoot::for_output(output_dir);

    let mut builder = ToolRegistry::builder();
    if let Some(services) = services {
        for (name, tool_config) in &config.server.tools {
            let tool = ContainerTool::new(
                name.clone(),
                tool_config.clone(),
                project.path(),
                services.clone(),
            );
            builder.register(name.clone(), Arc::new(tool)).map_err(registration)?;
        }
    }

    builder
        .register("read_file", Arc::new(ReadFileTool::new(project.clone())))
        .map_err(registration)?;
    builder
        .register("list_directory", Arc::new(ListDirectoryTool::new(project.clone())))
        .map_err(registration)?;
    builder
        .register(
            "find_files",
            Arc::new(FindFilesTool::new(
                project,
                config.orchestrator.exclude_dirs.clone(),
            )),
        )
        .map_err(registration)?;
    builder
        .register("write_file", Arc::new(WriteFileTool::new(output)))
        .map_err(registration)?;

    let registry = builder.build();
    info!(tools = ?registry.tool_names(), "Tool registry ready");
    Ok(registry)
}
