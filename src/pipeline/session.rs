//! One analysis run: configuration snapshot, phase records and phase state
//!
//! A session is owned by exactly one orchestrator loop; nothing in it is
//! shared with other sessions.

use super::phase::{PhaseArtifact, PhaseId};
use super::phases::{
    discovery::{ContractFile, DiscoveryOutput},
    endpoint_extraction::EndpointOutput,
    file_semantic::FileSemanticOutput,
    project_semantic::ProjectSemanticOutput,
    report::ReportOutput,
    static_analysis::StaticAnalysisOutput,
    test_generation::TestGenerationOutput,
};
use super::record::{Finding, InvalidTransition, PhaseRecord, PhaseStatus, PhaseTransition};
use crate::config::ArgusConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Rewritten after every phase; the only file that changes during a session
pub const PHASE_HISTORY_FILE: &str = "phase-history.json";

/// Outputs of completed phases, read by later phases
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub discovery: Option<DiscoveryOutput>,
    pub file_semantic: Option<FileSemanticOutput>,
    pub project_semantic: Option<ProjectSemanticOutput>,
    pub static_analysis: Option<StaticAnalysisOutput>,
    pub endpoints: Option<EndpointOutput>,
    pub tests: Option<TestGenerationOutput>,
    pub report: Option<ReportOutput>,
}

impl SessionState {
    pub fn apply(&mut self, artifact: PhaseArtifact) {
        match artifact {
            PhaseArtifact::Discovery(output) => self.discovery = Some(output),
            PhaseArtifact::FileSemantic(output) => self.file_semantic = Some(output),
            PhaseArtifact::ProjectSemantic(output) => self.project_semantic = Some(output),
            PhaseArtifact::StaticAnalysis(output) => self.static_analysis = Some(output),
            PhaseArtifact::Endpoints(output) => self.endpoints = Some(output),
            PhaseArtifact::Tests(output) => self.tests = Some(output),
            PhaseArtifact::Report(output) => self.report = Some(output),
        }
    }

    pub fn contracts(&self) -> &[ContractFile] {
        self.discovery
            .as_ref()
            .map(|d| d.contracts.as_slice())
            .unwrap_or_default()
    }

    /// Discovered contracts that per-file analysis did not filter out
    ///
    /// Every discovered contract when per-file analysis produced nothing.
    pub fn contracts_in_scope(&self) -> Vec<&ContractFile> {
        let contracts = self.contracts();
        match &self.file_semantic {
            Some(semantic) => contracts
                .iter()
                .filter(|c| semantic.analyze.iter().any(|name| name == &c.name))
                .collect(),
            None => contracts.iter().collect(),
        }
    }
}

pub struct AnalysisSession {
    id: Uuid,
    project_path: PathBuf,
    output_dir: PathBuf,
    started_at: DateTime<Utc>,
    config: Arc<ArgusConfig>,
    records: Vec<PhaseRecord>,
    transitions: Vec<PhaseTransition>,
    state: SessionState,
    cancel: CancellationToken,
}

#[derive(Serialize)]
struct PhaseHistory<'a> {
    session_id: String,
    project_path: &'a Path,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    phases: &'a [PhaseRecord],
    transitions: &'a [PhaseTransition],
}

impl AnalysisSession {
    /// Output goes to `<project>/<output.directory>/<YYYYmmdd_HHMMSS>`
    pub fn new(project_path: impl Into<PathBuf>, config: Arc<ArgusConfig>) -> Self {
        let project_path = project_path.into();
        let started_at = Utc::now();
        let id = Uuid::new_v4();
        let output_dir = unique_dir(
            project_path
                .join(&config.output.directory)
                .join(started_at.format("%Y%m%d_%H%M%S").to_string()),
            id,
        );

        Self {
            id,
            project_path,
            output_dir,
            started_at,
            config,
            records: PhaseId::ALL.iter().map(|id| PhaseRecord::new(*id)).collect(),
            transitions: Vec::new(),
            state: SessionState::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = unique_dir(output_dir.into(), self.id);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn config(&self) -> &Arc<ArgusConfig> {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    pub fn record(&self, phase: PhaseId) -> &PhaseRecord {
        &self.records[phase.number() - 1]
    }

    pub(crate) fn record_mut(&mut self, phase: PhaseId) -> &mut PhaseRecord {
        &mut self.records[phase.number() - 1]
    }

    pub(crate) fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn status(&self, phase: PhaseId) -> PhaseStatus {
        self.record(phase).status
    }

    /// Findings of every phase, in phase order
    pub fn all_findings(&self) -> impl Iterator<Item = &Finding> {
        self.records.iter().flat_map(|r| r.findings.iter())
    }

    pub fn transition(&mut self, phase: PhaseId, to: PhaseStatus) -> Result<(), InvalidTransition> {
        let record = self.record_mut(phase);
        let from = record.status;
        record.transition(to)?;
        self.transitions.push(PhaseTransition {
            phase,
            from,
            to,
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn prepare_output_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.output_dir)
    }

    pub fn history_path(&self) -> PathBuf {
        self.output_dir.join(PHASE_HISTORY_FILE)
    }

    pub fn write_history(&self) -> io::Result<()> {
        let history = PhaseHistory {
            session_id: self.id.to_string(),
            project_path: &self.project_path,
            started_at: self.started_at,
            updated_at: Utc::now(),
            phases: &self.records,
            transitions: &self.transitions,
        };
        let json = serde_json::to_string_pretty(&history)?;
        fs::write(self.history_path(), json)?;
        debug!(path = %self.history_path().display(), "Phase history written");
        Ok(())
    }
}

/// `path`, or `path_<8 hex chars of id>` when another session already
/// claimed it
fn unique_dir(path: PathBuf, id: Uuid) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let short_id = id.simple().to_string();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}_{}", name, &short_id[..8]))
}
