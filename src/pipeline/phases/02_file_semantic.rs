use super::discovery::ContractFile;
use super::llm_helper::{query_json, ModelFinding};
use crate::llm::LLMClient;
use crate::pipeline::fanout::collect_units;
use crate::pipeline::phase::{
    AnalysisPhase, PhaseArtifact, PhaseContext, PhaseError, PhaseId, PhaseOutput,
};
use crate::pipeline::record::Finding;
use crate::util::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MAX_SOURCE_CHARS: usize = 60_000;
const MAX_DOC_CHARS: usize = 4_000;

/// The model's verdict on whether a contract deserves the later phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub should_analyze_further: bool,
    #[serde(default)]
    pub skip_reason: Option<String>,
    /// 1-10
    pub confidence: u8,
    #[serde(default)]
    pub complexity: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedContract {
    pub name: String,
    pub reason: String,
    pub confidence: u8,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileSemanticOutput {
    pub summaries: BTreeMap<String, String>,
    pub classifications: BTreeMap<String, Classification>,
    /// Contracts that continue to phases 3-6
    pub analyze: Vec<String>,
    pub skipped: Vec<SkippedContract>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileAnswer {
    summary: String,
    findings: Vec<ModelFinding>,
    classification: Option<Value>,
}

#[derive(Debug)]
struct FileAnalysis {
    summary: String,
    findings: Vec<Finding>,
    classification: Option<Classification>,
}

pub struct FileSemanticPhase;

#[async_trait]
impl AnalysisPhase for FileSemanticPhase {
    fn id(&self) -> PhaseId {
        PhaseId::FileSemantic
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError> {
        let discovery = ctx
            .state()
            .discovery
            .as_ref()
            .ok_or_else(|| PhaseError::MissingInput("discovered contracts".to_string()))?;
        let orchestrator = &ctx.config().orchestrator;

        let units: Vec<(String, (String, String))> = discovery
            .contracts
            .iter()
            .map(|c| {
                let prompt = build_prompt(c, &discovery.documentation);
                (c.name.clone(), (c.name.clone(), prompt))
            })
            .collect();
        let names: Vec<String> = units.iter().map(|(name, _)| name.clone()).collect();

        let llm = ctx.services.analysis_llm.clone();
        let retry = ctx.retry_policy();
        let cancel = ctx.cancel().clone();
        let results = ctx
            .fan_out(PhaseId::FileSemantic, orchestrator.parallel_file_analysis)
            .run(units, move |(name, prompt): (String, String)| {
                let (llm, cancel) = (llm.clone(), cancel.clone());
                async move { analyze_file(llm, name, prompt, retry, cancel).await }
            })
            .await;

        let (succeeded, records) = collect_units(results, |a: &FileAnalysis| a.findings.len())?;

        let mut output = FileSemanticOutput::default();
        let mut findings = Vec::new();
        for (name, analysis) in succeeded {
            output.summaries.insert(name.clone(), analysis.summary);
            if let Some(classification) = analysis.classification {
                output.classifications.insert(name, classification);
            }
            findings.extend(analysis.findings);
        }

        let (analyze, skipped) = apply_filter(
            &names,
            &output.classifications,
            orchestrator.enable_contract_filtering,
            orchestrator.filter_low_confidence_threshold,
        );
        info!(
            analyze = analyze.len(),
            skipped = skipped.len(),
            "Contract classification applied"
        );
        let note = format!(
            "{} contracts selected for further analysis, {} skipped",
            analyze.len(),
            skipped.len()
        );
        output.analyze = analyze;
        output.skipped = skipped;

        Ok(PhaseOutput::new(PhaseArtifact::FileSemantic(output))
            .with_findings(findings)
            .with_units(records)
            .with_note(note))
    }
}

async fn analyze_file(
    llm: Arc<dyn LLMClient>,
    name: String,
    prompt: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> Result<FileAnalysis, PhaseError> {
    let label = format!("file_semantic:{}", name);
    let answer: FileAnswer = query_json(llm.as_ref(), prompt, 4000, &label, &retry, &cancel).await?;

    let classification = answer
        .classification
        .and_then(|value| serde_json::from_value::<Classification>(value).ok());
    if classification.is_none() {
        debug!(contract = %name, "No usable classification, contract stays in scope");
    }

    Ok(FileAnalysis {
        summary: answer.summary,
        findings: answer
            .findings
            .into_iter()
            .map(|f| f.into_finding(PhaseId::FileSemantic, &name))
            .collect(),
        classification,
    })
}

/// Splits contracts into analyze and skip sets
///
/// A contract is skipped only when the model says so with a confidence at or
/// above `threshold`. Contracts without a classification are analyzed, and
/// if every contract would be skipped, all of them are analyzed.
pub fn apply_filter(
    contracts: &[String],
    classifications: &BTreeMap<String, Classification>,
    enabled: bool,
    threshold: u8,
) -> (Vec<String>, Vec<SkippedContract>) {
    if !enabled {
        return (contracts.to_vec(), Vec::new());
    }

    let mut analyze = Vec::new();
    let mut skipped = Vec::new();
    for name in contracts {
        match classifications.get(name) {
            Some(c) if !c.should_analyze_further && c.confidence >= threshold => {
                skipped.push(SkippedContract {
                    name: name.clone(),
                    reason: c
                        .skip_reason
                        .clone()
                        .unwrap_or_else(|| "No reason given".to_string()),
                    confidence: c.confidence,
                });
            }
            _ => analyze.push(name.clone()),
        }
    }

    if analyze.is_empty() && !contracts.is_empty() {
        info!("Every contract was classified as skippable, analyzing all of them");
        return (contracts.to_vec(), Vec::new());
    }
    (analyze, skipped)
}

fn build_prompt(contract: &ContractFile, documentation: &str) -> String {
    let source: String = contract.source.chars().take(MAX_SOURCE_CHARS).collect();
    let docs: String = documentation.chars().take(MAX_DOC_CHARS).collect();
    let docs_section = if docs.is_empty() {
        String::new()
    } else {
        format!("Project documentation (excerpt):\n{}\n\n", docs)
    };

    format!(
        r#"Perform a security-focused semantic analysis of the Solidity file `{path}`.

{docs_section}Source:
```solidity
{source}
```

Describe what the contract does, list security issues you can identify, and classify
whether it deserves deeper analysis (interfaces, mocks and trivial libraries usually
do not).

Respond with JSON only:
{{
  "summary": "what the contract does and its trust assumptions",
  "findings": [
    {{"title": "short title", "severity": "critical|high|medium|low|informational",
      "description": "what is wrong and how it can be exploited",
      "location": "function or line", "recommendation": "how to fix it"}}
  ],
  "classification": {{
    "should_analyze_further": true,
    "skip_reason": null,
    "confidence": 8,
    "complexity": "low|medium|high"
  }}
}}

"confidence" is an integer from 1 to 10 describing how sure you are about the classification.
"#,
        path = contract.relative_display(),
        docs_section = docs_section,
        source = source,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification(analyze: bool, confidence: u8) -> Classification {
        Classification {
            should_analyze_further: analyze,
            skip_reason: (!analyze).then(|| "interface only".to_string()),
            confidence,
            complexity: Some("low".to_string()),
        }
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_requires_confidence() {
        let contracts = names(&["IVault.sol", "Vault.sol", "Mock.sol", "Lib.sol"]);
        let mut classes = BTreeMap::new();
        classes.insert("IVault.sol".to_string(), classification(false, 9));
        classes.insert("Vault.sol".to_string(), classification(true, 9));
        classes.insert("Mock.sol".to_string(), classification(false, 5));

        let (analyze, skipped) = apply_filter(&contracts, &classes, true, 7);
        assert_eq!(analyze, names(&["Vault.sol", "Mock.sol", "Lib.sol"]));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].name, "IVault.sol");
        assert_eq!(skipped[0].reason, "interface only");
    }

    #[test]
    fn test_filter_never_skips_everything() {
        let contracts = names(&["A.sol", "B.sol"]);
        let mut classes = BTreeMap::new();
        classes.insert("A.sol".to_string(), classification(false, 10));
        classes.insert("B.sol".to_string(), classification(false, 10));

        let (analyze, skipped) = apply_filter(&contracts, &classes, true, 7);
        assert_eq!(analyze, contracts);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_filter_disabled() {
        let contracts = names(&["A.sol"]);
        let mut classes = BTreeMap::new();
        classes.insert("A.sol".to_string(), classification(false, 10));

        let (analyze, _) = apply_filter(&contracts, &classes, false, 7);
        assert_eq!(analyze, contracts);
    }

    #[test]
    fn test_unparsable_classification_is_ignored() {
        let answer: FileAnswer = serde_json::from_str(
            r#"{"summary": "s", "findings": [], "classification": {"confidence": "very"}}"#,
        )
        .unwrap();
        let parsed = answer
            .classification
            .and_then(|v| serde_json::from_value::<Classification>(v).ok());
        assert!(parsed.is_none());
    }
}
