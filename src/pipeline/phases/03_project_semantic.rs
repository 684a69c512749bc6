use super::discovery::ContractFile;
use super::llm_helper::{match_contract, query_json, ModelFinding};
use crate::pipeline::phase::{
    AnalysisPhase, PhaseArtifact, PhaseContext, PhaseError, PhaseId, PhaseOutput,
};
use crate::pipeline::record::{Finding, UnitRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const PROJECT_UNIT: &str = "project";
pub const CROSS_CONTRACT_UNIT: &str = "cross-contract";
const MAX_PROMPT_SOURCE_CHARS: usize = 120_000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectSemanticOutput {
    pub overview: Option<String>,
    pub cross_contract: Option<String>,
    /// Contracts included in the cross-contract analysis
    pub cross_contract_scope: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProjectAnswer {
    #[serde(alias = "analysis")]
    overview: String,
    findings: Vec<ModelFinding>,
}

pub struct ProjectSemanticPhase;

#[async_trait]
impl AnalysisPhase for ProjectSemanticPhase {
    fn id(&self) -> PhaseId {
        PhaseId::ProjectSemantic
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError> {
        let state = ctx.state();
        let discovery = state
            .discovery
            .as_ref()
            .ok_or_else(|| PhaseError::MissingInput("discovered contracts".to_string()))?;
        let orchestrator = &ctx.config().orchestrator;
        let contracts = state.contracts_in_scope();
        let known: Vec<String> = contracts.iter().map(|c| c.name.clone()).collect();

        if orchestrator.skip_project_semantic_if_large
            && contracts.len() > orchestrator.project_semantic_max_contracts
        {
            let note = format!(
                "Project-level analysis not attempted: {} contracts in scope exceeds the limit of {}",
                contracts.len(),
                orchestrator.project_semantic_max_contracts
            );
            info!("{}", note);
            return Ok(PhaseOutput::new(PhaseArtifact::ProjectSemantic(
                ProjectSemanticOutput::default(),
            ))
            .with_note(note));
        }

        let llm = ctx.services.analysis_llm.as_ref();
        let retry = ctx.retry_policy();
        let mut output = ProjectSemanticOutput::default();
        let mut findings = Vec::new();
        let mut units = Vec::new();
        let mut notes = Vec::new();

        let summaries = state.file_semantic.as_ref().map(|f| &f.summaries);
        let prompt = project_prompt(&contracts, summaries, &discovery.documentation);
        let query = query_json::<ProjectAnswer>(
            llm,
            prompt,
            6000,
            "project_semantic",
            &retry,
            ctx.cancel(),
        );
        match query.await {
            Ok(answer) => {
                let unit_findings = convert(answer.findings, PROJECT_UNIT, &known);
                units.push(UnitRecord::succeeded(PROJECT_UNIT, unit_findings.len()));
                findings.extend(unit_findings);
                output.overview = Some(answer.overview);
            }
            Err(e) => {
                warn!(error = %e, "Project-level analysis failed");
                units.push(UnitRecord::failed(PROJECT_UNIT, e.to_info()));
            }
        }

        if contracts.len() >= 2 && !ctx.cancel().is_cancelled() {
            let max = orchestrator.cross_contract.max_contracts.max(2);
            let scope: Vec<&ContractFile> = contracts.iter().copied().take(max).collect();
            if contracts.len() > max {
                notes.push(format!(
                    "Cross-contract analysis limited to {} of {} contracts",
                    max,
                    contracts.len()
                ));
            }
            output.cross_contract_scope = scope.iter().map(|c| c.name.clone()).collect();

            let prompt = cross_contract_prompt(&scope);
            let query = query_json::<ProjectAnswer>(
                llm,
                prompt,
                6000,
                "cross_contract",
                &retry,
                ctx.cancel(),
            );
            match query.await {
                Ok(answer) => {
                    let unit_findings = convert(answer.findings, CROSS_CONTRACT_UNIT, &known);
                    units.push(UnitRecord::succeeded(CROSS_CONTRACT_UNIT, unit_findings.len()));
                    findings.extend(unit_findings);
                    output.cross_contract = Some(answer.overview);
                }
                Err(e) => {
                    warn!(error = %e, "Cross-contract analysis failed");
                    units.push(UnitRecord::failed(CROSS_CONTRACT_UNIT, e.to_info()));
                }
            }
        } else {
            notes.push("Cross-contract analysis needs at least two contracts".to_string());
        }

        if units.iter().all(|u| !u.is_success()) {
            let first = units
                .iter()
                .find_map(|u| u.error.clone())
                .unwrap_or_else(|| PhaseError::Internal("no units ran".into()).to_info());
            return Err(PhaseError::AllUnitsFailed { first, units });
        }

        let mut phase_output = PhaseOutput::new(PhaseArtifact::ProjectSemantic(output))
            .with_findings(findings)
            .with_units(units);
        phase_output.notes = notes;
        Ok(phase_output)
    }
}

/// Attributes a finding to the contract it names, else to `unit`
fn convert(findings: Vec<ModelFinding>, unit: &str, known: &[String]) -> Vec<Finding> {
    findings
        .into_iter()
        .map(|f| {
            let owner = f
                .contract
                .as_deref()
                .and_then(|c| match_contract(c, known))
                .unwrap_or_else(|| unit.to_string());
            f.into_finding(PhaseId::ProjectSemantic, &owner)
        })
        .collect()
}

fn sources_block(contracts: &[&ContractFile]) -> String {
    let mut block = String::new();
    for contract in contracts {
        if block.len() >= MAX_PROMPT_SOURCE_CHARS {
            block.push_str("\n(remaining sources omitted)\n");
            break;
        }
        block.push_str(&format!(
            "### {}\n```solidity\n{}\n```\n\n",
            contract.relative_display(),
            contract.source
        ));
    }
    block
}

const FINDINGS_FORMAT: &str = r#"{
  "overview": "...",
  "findings": [
    {"title": "short title", "severity": "critical|high|medium|low|informational",
     "contract": "File.sol", "description": "...", "location": "...", "recommendation": "..."}
  ]
}"#;

fn project_prompt(
    contracts: &[&ContractFile],
    summaries: Option<&std::collections::BTreeMap<String, String>>,
    documentation: &str,
) -> String {
    let listing: Vec<String> = contracts
        .iter()
        .map(|c| {
            let summary = summaries
                .and_then(|s| s.get(&c.name))
                .map(|s| s.as_str())
                .unwrap_or("(no per-file summary available)");
            format!("- {}: {}", c.relative_display(), summary)
        })
        .collect();

    format!(
        "Analyze this smart contract project as a whole: its architecture, trust boundaries, \
         privileged roles and value flows, and report project-level security issues.\n\n\
         Documentation:\n{}\n\nContracts:\n{}\n\nSources:\n{}\n\
         Respond with JSON only:\n{}\n",
        if documentation.is_empty() { "(none)" } else { documentation },
        listing.join("\n"),
        sources_block(contracts),
        FINDINGS_FORMAT
    )
}

fn cross_contract_prompt(contracts: &[&ContractFile]) -> String {
    format!(
        "Analyze the interactions between these contracts: external calls, shared state, \
         inheritance, access control across contracts, reentrancy through other contracts and \
         inconsistent assumptions. Report only issues that involve more than one contract.\n\n\
         {}\nRespond with JSON only, using \"overview\" for your analysis of the interactions:\n{}\n",
        sources_block(contracts),
        FINDINGS_FORMAT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_findings_attributed_to_named_contract() {
        let known = vec!["Vault.sol".to_string(), "Token.sol".to_string()];
        let findings = vec![
            ModelFinding {
                title: "Unchecked transfer".into(),
                severity: "high".into(),
                contract: Some("Token".into()),
                ..Default::default()
            },
            ModelFinding {
                title: "Centralization".into(),
                severity: "medium".into(),
                ..Default::default()
            },
        ];

        let converted = convert(findings, PROJECT_UNIT, &known);
        assert_eq!(converted[0].unit, "Token.sol");
        assert_eq!(converted[1].unit, PROJECT_UNIT);
        assert!(converted.iter().all(|f| f.source == PhaseId::ProjectSemantic));
    }

    #[test]
    fn test_answer_accepts_analysis_key() {
        let answer: ProjectAnswer =
            serde_json::from_str(r#"{"analysis": "calls flow from A to B"}"#).unwrap();
        assert_eq!(answer.overview, "calls flow from A to B");
        assert!(answer.findings.is_empty());
    }
}
