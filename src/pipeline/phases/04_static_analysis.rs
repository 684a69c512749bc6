use super::discovery::ContractFile;
use super::llm_helper::{match_contract, parse_json, ModelFinding};
use crate::error::ErrorKind;
use crate::llm::{ChatMessage, InvocationRecord, ToolLoop};
use crate::pipeline::phase::{
    AnalysisPhase, PhaseArtifact, PhaseContext, PhaseError, PhaseId, PhaseOutput,
};
use crate::pipeline::record::Finding;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{info, warn};

/// In-process tools offered next to the sandboxed analyzers
const HELPER_TOOLS: [&str; 3] = ["read_file", "list_directory", "find_files"];
const PROJECT_UNIT: &str = "project";

#[derive(Debug, Clone, Default, Serialize)]
pub struct StaticAnalysisOutput {
    pub summary: Option<String>,
    pub invocations: Vec<InvocationRecord>,
    pub iterations: usize,
    /// The iteration limit was reached before the model finished
    pub exhausted: bool,
    /// Tool executions as reported by the model
    pub tool_executions: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StaticAnswer {
    findings: Option<Vec<ModelFinding>>,
    vulnerabilities: Option<Vec<ModelFinding>>,
    tool_executions: Vec<Value>,
    summary: Option<String>,
}

impl StaticAnswer {
    fn into_parts(self) -> (Vec<ModelFinding>, Vec<Value>, Option<String>) {
        let findings = self.findings.or(self.vulnerabilities).unwrap_or_default();
        (findings, self.tool_executions, self.summary)
    }
}

pub struct StaticAnalysisPhase;

#[async_trait]
impl AnalysisPhase for StaticAnalysisPhase {
    fn id(&self) -> PhaseId {
        PhaseId::StaticAnalysis
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError> {
        let state = ctx.state();
        let contracts = state.contracts_in_scope();
        if contracts.is_empty() {
            return Err(PhaseError::MissingInput("discovered contracts".to_string()));
        }

        let dispatcher = ctx.services.dispatcher.as_ref();
        let registry = dispatcher.registry();
        let analyzers = registry.container_tool_names();
        if analyzers.is_empty() {
            return Err(PhaseError::MissingInput(
                "no sandboxed analysis tools are registered".to_string(),
            ));
        }
        let mut offered: Vec<&str> = analyzers.clone();
        offered.extend(HELPER_TOOLS.iter().copied().filter(|t| registry.get(t).is_some()));

        let config = ctx.config();
        let max_result = config
            .llm_config(&config.orchestrator.llm)
            .map(|llm| llm.max_tool_result_length)
            .unwrap_or_else(|| dispatcher.max_result_length());

        let messages = vec![
            ChatMessage::system(
                "You are a smart contract security auditor with access to static analysis tools. \
                 Call the tools, read their output and report confirmed issues.",
            ),
            ChatMessage::user(build_prompt(&contracts, &analyzers)),
        ];

        let tool_loop = ToolLoop::new(ctx.services.analysis_llm.as_ref(), dispatcher)
            .with_tools(&offered)
            .with_max_iterations(config.orchestrator.static_analysis_max_iterations)
            .with_max_tool_result_length(max_result)
            .with_temperature(0.1)
            .with_retry(ctx.retry_policy())
            .with_cancellation(ctx.cancel());

        let outcome = tool_loop
            .run(messages)
            .await
            .map_err(|e| PhaseError::from(e).exhausted())?;
        if outcome.cancelled {
            return Err(PhaseError::Cancelled);
        }

        if let Some(error) = infrastructure_failure(&outcome.invocations) {
            return Err(error);
        }

        let answer: StaticAnswer = parse_json(&outcome.final_content, "static_analysis")?;
        let (raw_findings, tool_executions, summary) = answer.into_parts();
        let known: Vec<String> = contracts.iter().map(|c| c.name.clone()).collect();
        let findings = normalize_findings(raw_findings, &known);

        let failed_calls = outcome.invocations.iter().filter(|i| !i.success).count();
        info!(
            findings = findings.len(),
            tool_calls = outcome.invocations.len(),
            failed_calls,
            iterations = outcome.iterations,
            "Static analysis complete"
        );

        let mut output = PhaseOutput::new(PhaseArtifact::StaticAnalysis(StaticAnalysisOutput {
            summary,
            iterations: outcome.iterations,
            exhausted: outcome.exhausted,
            tool_executions,
            invocations: outcome.invocations.clone(),
        }))
        .with_findings(findings)
        .with_note(format!(
            "{} tool calls, {} failed",
            outcome.invocations.len(),
            failed_calls
        ));
        if outcome.invocations.is_empty() {
            output = output.with_note("The model answered without calling any tool");
        }
        if outcome.exhausted {
            warn!("Static analysis hit its iteration limit");
            output = output.with_note("Iteration limit reached; the answer may be incomplete");
        }
        Ok(output)
    }
}

/// A failure of the sandbox itself on every call the model made
///
/// Image pulls were already retried by the tool, so the error is final.
fn infrastructure_failure(invocations: &[InvocationRecord]) -> Option<PhaseError> {
    if invocations.is_empty() {
        return None;
    }
    let kinds: Vec<ErrorKind> = invocations
        .iter()
        .map(|i| i.error_kind.filter(|_| !i.success))
        .collect::<Option<Vec<_>>>()?;
    if !kinds.iter().all(ErrorKind::is_infrastructure) {
        return None;
    }
    let kind = kinds[0];
    Some(
        PhaseError::Sandbox {
            kind,
            message: format!("All {} tool calls failed with {}", invocations.len(), kind),
        }
        .exhausted(),
    )
}

/// Attributes findings to contracts and drops duplicates, keeping the first
fn normalize_findings(raw: Vec<ModelFinding>, known: &[String]) -> Vec<Finding> {
    let fallback = match known {
        [only] => only.clone(),
        _ => PROJECT_UNIT.to_string(),
    };

    let mut seen = HashSet::new();
    let mut findings = Vec::new();
    for model_finding in raw {
        let unit = model_finding
            .contract
            .as_deref()
            .and_then(|c| match_contract(c, known))
            .unwrap_or_else(|| fallback.clone());
        let finding = model_finding.into_finding(PhaseId::StaticAnalysis, &unit);
        let key = (
            finding.unit.clone(),
            finding.title.to_lowercase(),
            finding.severity,
            finding.location.clone(),
        );
        if seen.insert(key) {
            findings.push(finding);
        }
    }
    findings
}

fn build_prompt(contracts: &[&ContractFile], analyzers: &[&str]) -> String {
    let listing: Vec<String> = contracts
        .iter()
        .map(|c| format!("- {}", c.relative_display()))
        .collect();

    format!(
        r#"Run static analysis on this Solidity project.

Contracts (paths relative to the project root):
{listing}

Available analyzers: {analyzers}. Call them on the contracts above, investigate their
output with the file tools where needed, and discard false positives.

When you are done, respond with JSON only:
{{
  "summary": "overall assessment",
  "tool_executions": [{{"tool": "slither", "target": "path", "status": "success|failed"}}],
  "findings": [
    {{"title": "short title", "severity": "critical|high|medium|low|informational",
      "contract": "File.sol", "tool": "slither", "description": "...",
      "location": "function or line", "recommendation": "..."}}
  ]
}}
"#,
        listing = listing.join("\n"),
        analyzers = analyzers.join(", "),
    )
}
