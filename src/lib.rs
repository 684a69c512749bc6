//! argus - sandboxed multi-phase security analysis for smart contract projects
//!
//! argus discovers the Solidity contracts of a project and runs them through a
//! fixed sequence of analysis phases. Semantic analysis is delegated to a
//! reasoning service; static analyzers (Slither, Mythril) run inside
//! network-isolated, read-only, time-bounded containers. Findings are merged
//! into a machine-readable document and a markdown report.
//!
//! # Core Concepts
//!
//! - **Sandbox**: one container per tool call, project mounted read-only, no
//!   network, removed afterwards, see [`docker`]
//! - **Tool dispatch**: a name-keyed registry of handlers behind a single
//!   `invoke(name, arguments)` entry point, see [`tools`]
//! - **Phases**: discovery, per-file semantic analysis, project semantic
//!   analysis, static analysis, endpoint extraction, test generation and
//!   report generation, see [`pipeline`]
//!
//! # Example Usage
//!
//! ```ignore
//! use argus::{AnalysisSession, ArgusConfig, PhaseOrchestrator};
//! use std::sync::Arc;
//!
//! async fn analyze(services: argus::PhaseServices) -> anyhow::Result<()> {
//!     let config = Arc::new(ArgusConfig::load(None)?);
//!     let mut session = AnalysisSession::new("./my-protocol", config);
//!
//!     let summary = PhaseOrchestrator::new(services).run(&mut session).await?;
//!     println!("Report: {:?}", summary.report_path);
//!     Ok(())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`config`]: configuration loading, defaults and validation
//! - [`docker`]: container runtime seam, image pulls, sandboxed execution
//! - [`tools`]: tool registry, dispatcher and the built-in tools
//! - [`llm`]: reasoning service clients and the tool-use loop
//! - [`pipeline`]: sessions, phases and the orchestrator
//! - [`progress`]: progress events emitted while a session runs

pub mod cli;
pub mod config;
pub mod docker;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod tools;
pub mod util;

pub use config::{ArgusConfig, ConfigError};
pub use docker::{
    ContainerRuntime, ContainerSandbox, DockerRuntime, ExecutionResult, ImagePullManager,
    ProjectRootResolver, PullPolicy, SandboxSpec,
};
pub use error::{ArgusError, ErrorInfo, ErrorKind};
pub use llm::{BackendError, LLMClient};
pub use pipeline::{
    AnalysisSession, Finding, PhaseId, PhaseOrchestrator, PhaseServices, PhaseStatus,
    SessionSummary, Severity,
};
pub use tools::{ToolDispatcher, ToolInvocationRequest, ToolInvocationResponse, ToolRegistry};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_argus() {
        assert_eq!(NAME, "argus");
    }
}
