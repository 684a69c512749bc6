//! Phase identity, contract and execution context

use super::fanout::FanOut;
use super::phases::{
    discovery::DiscoveryOutput, endpoint_extraction::EndpointOutput,
    file_semantic::FileSemanticOutput, project_semantic::ProjectSemanticOutput,
    report::ReportOutput, static_analysis::StaticAnalysisOutput,
    test_generation::TestGenerationOutput,
};
use super::record::{Finding, UnitRecord};
use super::session::{AnalysisSession, SessionState};
use crate::config::ArgusConfig;
use crate::error::ErrorKind;
use crate::llm::{BackendError, LLMClient};
use crate::progress::ProgressHandler;
use crate::tools::ToolDispatcher;
use crate::util::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Discovery,
    FileSemantic,
    ProjectSemantic,
    StaticAnalysis,
    EndpointExtraction,
    TestGeneration,
    Report,
}

/// What happens to a phase whose prerequisites did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisitePolicy {
    /// Go straight from pending to skipped
    SkipOnFailure,
    /// Run anyway with whatever input is available
    BestEffort,
}

impl PhaseId {
    pub const ALL: [PhaseId; 7] = [
        PhaseId::Discovery,
        PhaseId::FileSemantic,
        PhaseId::ProjectSemantic,
        PhaseId::StaticAnalysis,
        PhaseId::EndpointExtraction,
        PhaseId::TestGeneration,
        PhaseId::Report,
    ];

    /// 1-based position in the workflow
    pub fn number(&self) -> usize {
        match self {
            PhaseId::Discovery => 1,
            PhaseId::FileSemantic => 2,
            PhaseId::ProjectSemantic => 3,
            PhaseId::StaticAnalysis => 4,
            PhaseId::EndpointExtraction => 5,
            PhaseId::TestGeneration => 6,
            PhaseId::Report => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseId::Discovery => "discovery",
            PhaseId::FileSemantic => "file_semantic",
            PhaseId::ProjectSemantic => "project_semantic",
            PhaseId::StaticAnalysis => "static_analysis",
            PhaseId::EndpointExtraction => "endpoint_extraction",
            PhaseId::TestGeneration => "test_generation",
            PhaseId::Report => "report",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            PhaseId::Discovery => "Contract discovery",
            PhaseId::FileSemantic => "Per-file semantic analysis",
            PhaseId::ProjectSemantic => "Project semantic analysis",
            PhaseId::StaticAnalysis => "Static analysis",
            PhaseId::EndpointExtraction => "Endpoint extraction",
            PhaseId::TestGeneration => "Test generation",
            PhaseId::Report => "Report generation",
        }
    }

    pub fn prerequisites(&self) -> &'static [PhaseId] {
        use PhaseId::*;
        match self {
            Discovery => &[],
            FileSemantic => &[Discovery],
            ProjectSemantic => &[Discovery, FileSemantic],
            StaticAnalysis => &[Discovery],
            EndpointExtraction => &[Discovery],
            TestGeneration => &[Discovery, EndpointExtraction],
            Report => &[
                Discovery,
                FileSemantic,
                ProjectSemantic,
                StaticAnalysis,
                EndpointExtraction,
                TestGeneration,
            ],
        }
    }

    pub fn policy(&self) -> PrerequisitePolicy {
        match self {
            PhaseId::ProjectSemantic | PhaseId::TestGeneration | PhaseId::Report => {
                PrerequisitePolicy::BestEffort
            }
            _ => PrerequisitePolicy::SkipOnFailure,
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed state a phase hands to later phases
#[derive(Debug, Clone)]
pub enum PhaseArtifact {
    Discovery(DiscoveryOutput),
    FileSemantic(FileSemanticOutput),
    ProjectSemantic(ProjectSemanticOutput),
    StaticAnalysis(StaticAnalysisOutput),
    Endpoints(EndpointOutput),
    Tests(TestGenerationOutput),
    Report(ReportOutput),
}

/// Everything a phase produced; recorded once by the orchestrator
#[derive(Debug, Clone, Default)]
pub struct PhaseOutput {
    pub findings: Vec<Finding>,
    pub units: Vec<UnitRecord>,
    pub notes: Vec<String>,
    pub artifact: Option<PhaseArtifact>,
}

impl PhaseOutput {
    pub fn new(artifact: PhaseArtifact) -> Self {
        Self {
            artifact: Some(artifact),
            ..Default::default()
        }
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_units(mut self, units: Vec<UnitRecord>) -> Self {
        self.units = units;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reasoning service failed: {0}")]
    Backend(#[from] BackendError),

    #[error("{kind}: {message}")]
    Sandbox { kind: ErrorKind, message: String },

    #[error("Tool '{tool}' failed: {error}")]
    Tool {
        tool: String,
        error: crate::error::ErrorInfo,
    },

    #[error("All {} units failed; first error: {first}", units.len())]
    AllUnitsFailed {
        first: crate::error::ErrorInfo,
        units: Vec<UnitRecord>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transient failure that already spent its retry budget where the
    /// call was made
    #[error("{0} (retries exhausted)")]
    RetriesExhausted(Box<PhaseError>),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl PhaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PhaseError::MissingInput(_) => ErrorKind::NotFound,
            PhaseError::InvalidInput(_) => ErrorKind::InvalidInput,
            PhaseError::Backend(_) => ErrorKind::ExternalServiceFailure,
            PhaseError::Sandbox { kind, .. } => *kind,
            PhaseError::Tool { error, .. } => error.kind,
            PhaseError::AllUnitsFailed { first, .. } => first.kind,
            PhaseError::RetriesExhausted(inner) => inner.kind(),
            PhaseError::Io(_) => ErrorKind::Io,
            PhaseError::Cancelled => ErrorKind::Cancelled,
            PhaseError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Timeouts, rate limits, network errors and pull failures are worth
    /// another attempt; everything else fails the phase immediately.
    ///
    /// Errors wrapped by [`PhaseError::exhausted`] are never transient, so a
    /// failure is retried only by the layer that made the call.
    pub fn is_transient(&self) -> bool {
        match self {
            PhaseError::Backend(e) => e.is_transient(),
            PhaseError::Sandbox { kind, .. } => *kind == ErrorKind::ImagePullFailure,
            _ => false,
        }
    }

    /// Marks an error returned by a call that ran under its own retry policy
    pub fn exhausted(self) -> Self {
        if self.is_transient() {
            PhaseError::RetriesExhausted(Box::new(self))
        } else {
            self
        }
    }

    pub fn to_info(&self) -> crate::error::ErrorInfo {
        crate::error::ErrorInfo::new(self.kind(), self.to_string())
    }
}

/// Collaborators shared by every phase of a session
#[derive(Clone)]
pub struct PhaseServices {
    /// Client for the analysis phases (`orchestrator.llm`)
    pub analysis_llm: Arc<dyn LLMClient>,
    /// Client for test generation (`generator.llm`)
    pub generator_llm: Arc<dyn LLMClient>,
    pub dispatcher: Arc<ToolDispatcher>,
}

/// Read-only view of the session handed to a running phase
pub struct PhaseContext<'a> {
    pub session: &'a AnalysisSession,
    pub services: &'a PhaseServices,
    pub progress: &'a Arc<dyn ProgressHandler>,
}

impl<'a> PhaseContext<'a> {
    pub fn config(&self) -> &Arc<ArgusConfig> {
        self.session.config()
    }

    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    pub fn project_path(&self) -> &Path {
        self.session.project_path()
    }

    pub fn output_dir(&self) -> &Path {
        self.session.output_dir()
    }

    pub fn cancel(&self) -> &CancellationToken {
        self.session.cancel_token()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.config().retry_policy()
    }

    /// Bounded fan-out for `phase`, sequential unless `parallel`
    pub fn fan_out(&self, phase: PhaseId, parallel: bool) -> FanOut {
        let limit = if parallel {
            self.config().orchestrator.max_concurrency
        } else {
            1
        };
        FanOut::new(phase, limit, self.cancel().clone()).with_progress(self.progress.clone())
    }
}

#[async_trait]
pub trait AnalysisPhase: Send + Sync {
    fn id(&self) -> PhaseId;

    fn prerequisites(&self) -> &'static [PhaseId] {
        self.id().prerequisites()
    }

    fn policy(&self) -> PrerequisitePolicy {
        self.id().policy()
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError>;
}
