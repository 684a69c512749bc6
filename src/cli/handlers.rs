//! Command handlers; each returns the process exit code

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::commands::{AnalyzeArgs, ConfigArgs};
use super::output::{OutputFormat, OutputFormatter};
use crate::config::ArgusConfig;
use crate::docker::{ContainerRuntime, DockerRuntime};
use crate::error::ArgusError;
use crate::llm::client_from_config;
use crate::pipeline::{AnalysisSession, PhaseOrchestrator, PhaseServices};
use crate::tools::{standard_registry, SandboxServices, ToolDispatcher};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_KEY_NOT_FOUND: i32 = 2;

pub async fn handle_analyze(args: &AnalyzeArgs, config_path: Option<&Path>) -> i32 {
    let project = match args.project_path.canonicalize() {
        Ok(path) if path.is_dir() => path,
        Ok(path) => {
            eprintln!("Error: {} is not a directory", path.display());
            return EXIT_FAILURE;
        }
        Err(e) => {
            eprintln!(
                "Error: cannot access {}: {}",
                args.project_path.display(),
                e
            );
            return EXIT_FAILURE;
        }
    };

    let config = match ArgusConfig::load(config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => return report_fatal(ArgusError::ConfigurationInvalid(e)),
    };
    debug!(config = ?config.source_path(), "Configuration loaded");

    let runtime: Arc<dyn ContainerRuntime> = match DockerRuntime::connect() {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => return report_fatal(ArgusError::SandboxUnavailable(e.to_string())),
    };

    let analysis_llm = match client_from_config(&config, &config.orchestrator.llm) {
        Ok(client) => client,
        Err(e) => return report_fatal(ArgusError::ExternalServiceFailure(e)),
    };
    let generator_llm = if config.generator.llm == config.orchestrator.llm {
        analysis_llm.clone()
    } else {
        match client_from_config(&config, &config.generator.llm) {
            Ok(client) => client,
            Err(e) => return report_fatal(ArgusError::ExternalServiceFailure(e)),
        }
    };

    let cancel = CancellationToken::new();
    let mut session =
        AnalysisSession::new(&project, config.clone()).with_cancellation(cancel.clone());

    let sandbox = SandboxServices::new(runtime.clone(), &config);
    let output_dir = session.output_dir().to_path_buf();
    let registry = match standard_registry(&config, &project, &output_dir, Some(sandbox)) {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Failed to build the tool registry");
            eprintln!("Error: {}", e);
            return EXIT_FAILURE;
        }
    };
    let services = PhaseServices {
        analysis_llm,
        generator_llm,
        dispatcher: Arc::new(ToolDispatcher::new(registry, config.server.max_result_length)),
    };
    let orchestrator = PhaseOrchestrator::new(services).with_runtime(runtime);

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the session");
            cancel.cancel();
        }
    });

    let result = orchestrator.run(&mut session).await;
    interrupt.abort();

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => return report_fatal(e),
    };

    let formatter = OutputFormatter::new(args.format.into());
    match formatter.format_summary(&summary) {
        Ok(text) => println!("{}", text),
        Err(e) => error!(error = %e, "Failed to format the session summary"),
    }

    if summary.report_produced() {
        info!(report = ?summary.report_path, "Analysis finished");
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

pub fn handle_config(args: &ConfigArgs, config_path: Option<&Path>) -> i32 {
    let config = match ArgusConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => return report_fatal(ArgusError::ConfigurationInvalid(e)),
    };
    let formatter = OutputFormatter::new(OutputFormat::Human);

    let value = match &args.key {
        Some(key) => match config.get(key) {
            Some(value) => value,
            None => {
                eprintln!("Error: no configuration value at '{}'", key);
                return EXIT_KEY_NOT_FOUND;
            }
        },
        None => config.effective_document(),
    };

    match formatter.format_config_value(&value) {
        Ok(text) => {
            println!("{}", text);
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FAILURE
        }
    }
}

fn report_fatal(e: ArgusError) -> i32 {
    error!(kind = %e.kind(), error = %e, "Fatal error");
    eprintln!("Error: {}", e);
    EXIT_FAILURE
}
