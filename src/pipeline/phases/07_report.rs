use super::file_semantic::{Classification, SkippedContract};
use super::llm_helper::query_text;
use crate::pipeline::phase::{
    AnalysisPhase, PhaseArtifact, PhaseContext, PhaseError, PhaseId, PhaseOutput,
};
use crate::pipeline::record::{Finding, PhaseRecord, PhaseStatus, PhaseTransition, Severity};
use crate::pipeline::session::SessionState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const REPORT_FILE: &str = "argus-security-report.md";
pub const DATA_FILE: &str = "raw-analysis-data.json";
const NARRATIVE_FINDINGS_LIMIT: usize = 60;

#[derive(Debug, Clone, Serialize)]
pub struct ReportOutput {
    pub report_path: PathBuf,
    pub data_path: PathBuf,
    /// The reasoning service wrote the summary section
    pub narrative: bool,
}

/// Machine-readable findings document
#[derive(Serialize)]
struct RawAnalysisData<'a> {
    session_id: String,
    project_path: &'a Path,
    started_at: DateTime<Utc>,
    generated_at: DateTime<Utc>,
    duration_ms: i64,
    contracts: ContractSummary<'a>,
    classifications: Option<&'a BTreeMap<String, Classification>>,
    findings_by_phase: BTreeMap<&'static str, &'a [Finding]>,
    endpoints: Option<&'a BTreeMap<String, Vec<super::endpoint_extraction::Endpoint>>>,
    generated_tests: Option<&'a super::test_generation::TestGenerationOutput>,
    phases: &'a [PhaseRecord],
    transitions: &'a [PhaseTransition],
}

#[derive(Serialize)]
struct ContractSummary<'a> {
    discovered: Vec<&'a str>,
    analyzed: Vec<&'a str>,
    skipped: &'a [SkippedContract],
}

impl<'a> ContractSummary<'a> {
    fn from_state(state: &'a SessionState) -> Self {
        Self {
            discovered: state.contracts().iter().map(|c| c.name.as_str()).collect(),
            analyzed: state
                .contracts_in_scope()
                .into_iter()
                .map(|c| c.name.as_str())
                .collect(),
            skipped: state
                .file_semantic
                .as_ref()
                .map(|f| f.skipped.as_slice())
                .unwrap_or_default(),
        }
    }
}

pub struct ReportPhase;

#[async_trait]
impl AnalysisPhase for ReportPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Report
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError> {
        let session = ctx.session;
        let state = ctx.state();
        let records = session.records();
        let generated_at = Utc::now();

        let data_path = ctx.output_dir().join(DATA_FILE);
        let report_path = ctx.output_dir().join(REPORT_FILE);

        let data = RawAnalysisData {
            session_id: session.id().to_string(),
            project_path: session.project_path(),
            started_at: session.started_at(),
            generated_at,
            duration_ms: (generated_at - session.started_at()).num_milliseconds(),
            contracts: ContractSummary::from_state(state),
            classifications: state.file_semantic.as_ref().map(|f| &f.classifications),
            findings_by_phase: records
                .iter()
                .filter(|r| !r.findings.is_empty())
                .map(|r| (r.phase.as_str(), r.findings.as_slice()))
                .collect(),
            endpoints: state.endpoints.as_ref().map(|e| &e.by_contract),
            generated_tests: state.tests.as_ref(),
            phases: records,
            transitions: session.transitions(),
        };
        let json = serde_json::to_string_pretty(&data).map_err(|e| {
            PhaseError::Internal(format!("Failed to serialize analysis data: {}", e))
        })?;
        write_new(&data_path, &json)?;

        let findings: Vec<&Finding> = session.all_findings().collect();
        let narrative = if findings.is_empty() {
            Err("No findings were reported, so no narrative was requested".to_string())
        } else {
            let prompt = narrative_prompt(&findings);
            query_text(
                ctx.services.analysis_llm.as_ref(),
                prompt,
                3000,
                "report_narrative",
                &ctx.retry_policy(),
                ctx.cancel(),
            )
            .await
            .map(|text| text.trim().to_string())
            .map_err(|e| {
                warn!(error = %e, "Report narrative unavailable");
                format!("Narrative unavailable: {}", e)
            })
        };

        let markdown = render_markdown(
            session.project_path(),
            generated_at,
            records,
            state,
            narrative.as_deref().map_err(String::as_str),
        );
        write_new(&report_path, &markdown)?;
        info!(report = %report_path.display(), data = %data_path.display(), "Report written");

        Ok(PhaseOutput::new(PhaseArtifact::Report(ReportOutput {
            report_path,
            data_path,
            narrative: narrative.is_ok(),
        })))
    }
}

/// Writes `content` to a file that must not exist yet
fn write_new(path: &Path, content: &str) -> Result<(), PhaseError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn narrative_prompt(findings: &[&Finding]) -> String {
    let mut listing = String::new();
    for finding in findings.iter().take(NARRATIVE_FINDINGS_LIMIT) {
        let _ = writeln!(
            listing,
            "- [{}] {} ({}): {}",
            finding.severity, finding.title, finding.unit, finding.description
        );
    }
    if findings.len() > NARRATIVE_FINDINGS_LIMIT {
        let _ = writeln!(
            listing,
            "- ... {} more findings",
            findings.len() - NARRATIVE_FINDINGS_LIMIT
        );
    }

    format!(
        "Write the executive summary of a smart contract security report in markdown. \
         Describe the overall risk, the most important issues and the recommended next steps \
         in a few paragraphs. Do not repeat every finding and do not add headings above level 3.\n\n\
         Findings:\n{}",
        listing
    )
}

fn status_annotation(record: &PhaseRecord) -> String {
    match record.status {
        PhaseStatus::Failed => {
            let error = record
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            format!("**failed**: {}", error)
        }
        PhaseStatus::Skipped => format!(
            "**skipped**: {}",
            record.notes.last().map(String::as_str).unwrap_or("not run")
        ),
        PhaseStatus::Succeeded if record.failed_units() > 0 => format!(
            "succeeded, {} of {} units failed",
            record.failed_units(),
            record.units.len()
        ),
        status => status.to_string(),
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub fn render_markdown(
    project: &Path,
    generated_at: DateTime<Utc>,
    records: &[PhaseRecord],
    state: &SessionState,
    narrative: Result<&str, &str>,
) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Argus Security Report\n");
    let _ = writeln!(md, "- **Project:** `{}`", project.display());
    let _ = writeln!(md, "- **Generated:** {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let contracts = ContractSummary::from_state(state);
    let _ = writeln!(
        md,
        "- **Contracts:** {} discovered, {} analyzed, {} skipped\n",
        contracts.discovered.len(),
        contracts.analyzed.len(),
        contracts.skipped.len()
    );

    let _ = writeln!(md, "## Summary\n");
    match narrative {
        Ok(text) => {
            let _ = writeln!(md, "{}\n", text);
        }
        Err(note) => {
            let _ = writeln!(md, "_{}_\n", note);
        }
    }

    let _ = writeln!(md, "## Phases\n");
    let _ = writeln!(md, "| # | Phase | Status | Findings | Duration |");
    let _ = writeln!(md, "|---|-------|--------|----------|----------|");
    for record in records.iter().filter(|r| r.phase != PhaseId::Report) {
        let duration = record
            .duration_ms()
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} |",
            record.phase.number(),
            record.phase.title(),
            escape_cell(&status_annotation(record)),
            record.findings.len(),
            duration
        );
    }
    md.push('\n');

    let all: Vec<&Finding> = records.iter().flat_map(|r| r.findings.iter()).collect();
    let _ = writeln!(md, "## Findings\n");
    if all.is_empty() {
        let _ = writeln!(md, "No findings were reported.\n");
    }
    for severity in Severity::ALL {
        let group: Vec<&&Finding> = all.iter().filter(|f| f.severity == severity).collect();
        if group.is_empty() {
            continue;
        }
        let _ = writeln!(md, "### {} ({})\n", capitalize(severity.as_str()), group.len());
        for finding in group {
            let _ = writeln!(md, "#### {} ({})\n", finding.title, finding.unit);
            let _ = writeln!(
                md,
                "- **Source:** {}{}",
                finding.source.title(),
                finding
                    .tool
                    .as_deref()
                    .map(|t| format!(" via {}", t))
                    .unwrap_or_default()
            );
            if let Some(location) = &finding.location {
                let _ = writeln!(md, "- **Location:** {}", location);
            }
            let _ = writeln!(md, "\n{}\n", finding.description);
            if let Some(recommendation) = &finding.recommendation {
                let _ = writeln!(md, "**Recommendation:** {}\n", recommendation);
            }
        }
    }

    if let Some(tests) = state.tests.as_ref().filter(|t| !t.tests.is_empty()) {
        let _ = writeln!(md, "## Generated Tests\n");
        if tests.priority_only {
            let _ = writeln!(md, "_Limited to priority findings._\n");
        }
        for test in &tests.tests {
            let _ = writeln!(
                md,
                "- `{}` ({}, {} findings)",
                test.path, test.contract, test.findings_covered
            );
        }
        let _ = writeln!(
            md,
            "\n{} test files generated. They are not compiled or executed by argus.",
            tests.results.tests_generated
        );
        md.push('\n');
    }

    md
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
