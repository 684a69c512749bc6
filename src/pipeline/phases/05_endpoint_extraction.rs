use super::discovery::ContractFile;
use super::llm_helper::{parse_json, query_text};
use crate::llm::LLMClient;
use crate::pipeline::fanout::collect_units;
use crate::pipeline::phase::{
    AnalysisPhase, PhaseArtifact, PhaseContext, PhaseError, PhaseId, PhaseOutput,
};
use crate::util::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const MAX_SOURCE_CHARS: usize = 60_000;

/// An externally callable function of a contract
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub name: String,
    pub signature: String,
    pub visibility: String,
    pub mutability: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointOutput {
    pub by_contract: BTreeMap<String, Vec<Endpoint>>,
}

impl EndpointOutput {
    pub fn total(&self) -> usize {
        self.by_contract.values().map(Vec::len).sum()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointAnswer {
    List(Vec<Endpoint>),
    Wrapped { endpoints: Vec<Endpoint> },
}

impl From<EndpointAnswer> for Vec<Endpoint> {
    fn from(answer: EndpointAnswer) -> Self {
        match answer {
            EndpointAnswer::List(endpoints) | EndpointAnswer::Wrapped { endpoints } => endpoints,
        }
    }
}

pub struct EndpointExtractionPhase;

#[async_trait]
impl AnalysisPhase for EndpointExtractionPhase {
    fn id(&self) -> PhaseId {
        PhaseId::EndpointExtraction
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError> {
        let contracts = ctx.state().contracts_in_scope();
        if contracts.is_empty() {
            return Err(PhaseError::MissingInput("discovered contracts".to_string()));
        }

        let units: Vec<(String, (String, String))> = contracts
            .iter()
            .map(|c| (c.name.clone(), (c.name.clone(), build_prompt(c))))
            .collect();

        let llm = ctx.services.analysis_llm.clone();
        let retry = ctx.retry_policy();
        let cancel = ctx.cancel().clone();
        let results = ctx
            .fan_out(PhaseId::EndpointExtraction, false)
            .run(units, move |(name, prompt): (String, String)| {
                let (llm, cancel) = (llm.clone(), cancel.clone());
                async move { extract(llm, name, prompt, retry, cancel).await }
            })
            .await;

        let (succeeded, records) = collect_units(results, |_: &Vec<Endpoint>| 0)?;
        let output = EndpointOutput {
            by_contract: succeeded.into_iter().collect(),
        };
        info!(
            contracts = output.by_contract.len(),
            endpoints = output.total(),
            "Endpoint extraction complete"
        );

        let note = format!(
            "{} endpoints across {} contracts",
            output.total(),
            output.by_contract.len()
        );
        Ok(PhaseOutput::new(PhaseArtifact::Endpoints(output))
            .with_units(records)
            .with_note(note))
    }
}

async fn extract(
    llm: Arc<dyn LLMClient>,
    name: String,
    prompt: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> Result<Vec<Endpoint>, PhaseError> {
    let label = format!("endpoint_extraction:{}", name);
    let content = query_text(llm.as_ref(), prompt, 3000, &label, &retry, &cancel).await?;
    parse_endpoints(&content, &label)
}

pub fn parse_endpoints(content: &str, label: &str) -> Result<Vec<Endpoint>, PhaseError> {
    let answer: EndpointAnswer = parse_json(content, label)?;
    let mut endpoints: Vec<Endpoint> = answer.into();
    endpoints.retain(|e| !e.name.trim().is_empty());
    Ok(endpoints)
}

fn build_prompt(contract: &ContractFile) -> String {
    let source: String = contract.source.chars().take(MAX_SOURCE_CHARS).collect();
    format!(
        r#"List the externally callable functions (public and external) of `{path}`,
including the constructor, fallback and receive functions when present.

```solidity
{source}
```

Respond with a JSON array only:
[
  {{"name": "withdraw", "signature": "withdraw(uint256)", "visibility": "external",
    "mutability": "nonpayable|payable|view|pure", "description": "what it does"}}
]
"#,
        path = contract.relative_display(),
        source = source,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_array_and_wrapped() {
        let bare = parse_endpoints(
            r#"[{"name": "deposit", "signature": "deposit()", "mutability": "payable"}]"#,
            "test",
        )
        .unwrap();
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].mutability, "payable");

        let wrapped = parse_endpoints(
            "```json\n{\"endpoints\": [{\"name\": \"withdraw\"}, {\"name\": \"\"}]}\n```",
            "test",
        )
        .unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].name, "withdraw");
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        let err = parse_endpoints(r#"{"functions": []}"#, "test").unwrap_err();
        assert!(!err.is_transient());
    }
}
