use super::discovery::ContractFile;
use super::endpoint_extraction::Endpoint;
use super::llm_helper::extract_json_from_markdown;
use crate::llm::{ChatMessage, LLMClient, ToolLoop};
use crate::pipeline::fanout::collect_units;
use crate::pipeline::phase::{
    AnalysisPhase, PhaseArtifact, PhaseContext, PhaseError, PhaseId, PhaseOutput,
};
use crate::pipeline::record::{Finding, Severity};
use crate::tools::ToolDispatcher;
use crate::util::RetryPolicy;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAX_SOURCE_CHARS: usize = 40_000;
const WRITE_TOOL: &str = "write_file";
/// File tools offered to the model; `write_file` only reaches the output
/// directory
const GENERATOR_TOOLS: [&str; 4] = ["read_file", "list_directory", "find_files", WRITE_TOOL];

const SYSTEM_PROMPT: &str = "You are a smart contract security engineer who writes exploit \
    tests. Use the tools to inspect the project and to write the test file you are asked for.";

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedTest {
    pub contract: String,
    /// Relative to the session output directory
    pub path: String,
    pub findings_covered: usize,
    pub iterations: usize,
    /// The model wrote the file itself rather than answering with the code
    pub written_by_model: bool,
}

/// Counters kept in the findings document
///
/// Generated tests are not compiled or executed, so only
/// `tests_generated` moves.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TestResults {
    pub tests_generated: usize,
    pub tests_executed: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub compilation_succeeded: usize,
    pub compilation_failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestGenerationOutput {
    /// Findings were narrowed to the priority severities
    pub priority_only: bool,
    pub tests: Vec<GeneratedTest>,
    pub results: TestResults,
}

/// Everything one contract's test generation needs
struct TestJob {
    contract: String,
    path: String,
    prompt: String,
    findings: usize,
}

#[derive(Clone)]
struct Generator {
    llm: Arc<dyn LLMClient>,
    dispatcher: Arc<ToolDispatcher>,
    output_dir: PathBuf,
    max_iterations: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

pub struct TestGenerationPhase;

#[async_trait]
impl AnalysisPhase for TestGenerationPhase {
    fn id(&self) -> PhaseId {
        PhaseId::TestGeneration
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError> {
        let state = ctx.state();
        if state.discovery.is_none() {
            return Err(PhaseError::MissingInput("discovered contracts".to_string()));
        }
        let config = ctx.config();
        let settings = &config.generator.test_generation;

        let findings: Vec<Finding> = ctx.session.all_findings().cloned().collect();
        let (selected, priority_only) = select_findings(
            findings,
            settings.priority_only_threshold,
            &settings.priority_severities,
        );
        if priority_only {
            info!(
                kept = selected.len(),
                severities = ?settings.priority_severities,
                "Finding count above threshold, generating tests for priority findings only"
            );
        }

        let contracts = state.contracts_in_scope();
        let grouped = group_by_contract(selected, &contracts);
        if grouped.is_empty() {
            return Ok(PhaseOutput::new(PhaseArtifact::Tests(TestGenerationOutput {
                priority_only,
                ..Default::default()
            }))
            .with_note("No contract findings to generate tests for"));
        }
        if ctx.services.dispatcher.registry().get(WRITE_TOOL).is_none() {
            return Err(PhaseError::MissingInput(format!(
                "the {} tool is not registered",
                WRITE_TOOL
            )));
        }

        let endpoints = state.endpoints.as_ref().map(|e| &e.by_contract);
        let jobs: Vec<(String, TestJob)> = grouped
            .into_iter()
            .map(|(contract, findings)| {
                let path = test_file_path(&settings.test_file_prefix, &contract.stem());
                let contract_endpoints = endpoints
                    .and_then(|by_contract| by_contract.get(&contract.name))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let job = TestJob {
                    contract: contract.name.clone(),
                    prompt: build_prompt(
                        contract,
                        &findings,
                        contract_endpoints,
                        &config.generator.framework,
                        &path,
                    ),
                    findings: findings.len(),
                    path,
                };
                (contract.name.clone(), job)
            })
            .collect();

        let generator = Generator {
            llm: ctx.services.generator_llm.clone(),
            dispatcher: ctx.services.dispatcher.clone(),
            output_dir: ctx.output_dir().to_path_buf(),
            max_iterations: settings.max_iterations,
            retry: ctx.retry_policy(),
            cancel: ctx.cancel().clone(),
        };
        let results = ctx
            .fan_out(PhaseId::TestGeneration, config.orchestrator.parallel_test_generation)
            .run(jobs, move |job: TestJob| {
                let generator = generator.clone();
                async move { generator.generate(job).await }
            })
            .await;

        let (succeeded, records) = collect_units(results, |_: &GeneratedTest| 0)?;
        let tests: Vec<GeneratedTest> = succeeded.into_iter().map(|(_, test)| test).collect();
        let note = format!("{} test files written, not executed", tests.len());
        let results = TestResults {
            tests_generated: tests.len(),
            ..Default::default()
        };

        Ok(PhaseOutput::new(PhaseArtifact::Tests(TestGenerationOutput {
            priority_only,
            tests,
            results,
        }))
        .with_units(records)
        .with_note(note))
    }
}

impl Generator {
    async fn generate(&self, job: TestJob) -> Result<GeneratedTest, PhaseError> {
        let registry = self.dispatcher.registry();
        let offered: Vec<&str> = GENERATOR_TOOLS
            .iter()
            .copied()
            .filter(|t| registry.get(t).is_some())
            .collect();

        let outcome = ToolLoop::new(self.llm.as_ref(), &self.dispatcher)
            .with_tools(&offered)
            .with_max_iterations(self.max_iterations)
            .with_temperature(0.2)
            .with_retry(self.retry)
            .with_cancellation(&self.cancel)
            .run(vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(job.prompt.clone()),
            ])
            .await
            .map_err(|e| PhaseError::from(e).exhausted())?;
        if outcome.cancelled {
            return Err(PhaseError::Cancelled);
        }

        let written_by_model = self.output_dir.join(&job.path).is_file();
        if !written_by_model {
            self.write_answer(&job, &outcome.final_content).await?;
        }
        debug!(
            contract = %job.contract,
            path = %job.path,
            iterations = outcome.iterations,
            tool_calls = outcome.invocations.len(),
            written_by_model,
            "Test file written"
        );

        Ok(GeneratedTest {
            contract: job.contract,
            path: job.path,
            findings_covered: job.findings,
            iterations: outcome.iterations,
            written_by_model,
        })
    }

    /// Writes a test file the model returned as a code block instead of
    /// writing it with the tool
    async fn write_answer(&self, job: &TestJob, answer: &str) -> Result<(), PhaseError> {
        if !answer.contains("```") {
            return Err(PhaseError::InvalidInput(format!(
                "No test file was written for {}",
                job.contract
            )));
        }
        let code = extract_json_from_markdown(answer);
        if code.is_empty() {
            return Err(PhaseError::InvalidInput(format!(
                "Empty test file generated for {}",
                job.contract
            )));
        }
        warn!(contract = %job.contract, "Model answered with code, writing the test file for it");

        let response = self
            .dispatcher
            .invoke(WRITE_TOOL, json!({ "path": job.path, "content": code }))
            .await;
        match response.error {
            Some(error) => Err(PhaseError::Tool {
                tool: WRITE_TOOL.to_string(),
                error,
            }),
            None => Ok(()),
        }
    }
}

/// Narrows `findings` to the priority severities once there are more than
/// `threshold` of them
pub fn select_findings(
    findings: Vec<Finding>,
    threshold: usize,
    priority: &[Severity],
) -> (Vec<Finding>, bool) {
    if findings.len() <= threshold {
        return (findings, false);
    }
    let selected = findings
        .into_iter()
        .filter(|f| priority.contains(&f.severity))
        .collect();
    (selected, true)
}

/// Findings keyed by the contract they belong to; findings about the
/// project as a whole are left out
fn group_by_contract<'c>(
    findings: Vec<Finding>,
    contracts: &[&'c ContractFile],
) -> Vec<(&'c ContractFile, Vec<Finding>)> {
    let mut grouped: BTreeMap<usize, Vec<Finding>> = BTreeMap::new();
    for finding in findings {
        if let Some(idx) = contracts.iter().position(|c| c.name == finding.unit) {
            grouped.entry(idx).or_default().push(finding);
        }
    }
    grouped
        .into_iter()
        .map(|(idx, findings)| (contracts[idx], findings))
        .collect()
}

pub fn test_file_path(prefix: &str, stem: &str) -> String {
    format!("tests/{}.{}.test.js", prefix, stem)
}

fn build_prompt(
    contract: &ContractFile,
    findings: &[Finding],
    endpoints: &[Endpoint],
    framework: &str,
    test_path: &str,
) -> String {
    let source: String = contract.source.chars().take(MAX_SOURCE_CHARS).collect();
    let findings_text: Vec<String> = findings
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let mut line = format!("{}. [{}] {}: {}", i + 1, f.severity, f.title, f.description);
            if let Some(location) = &f.location {
                line.push_str(&format!(" (at {})", location));
            }
            line
        })
        .collect();
    let endpoints_text = if endpoints.is_empty() {
        "(not available)".to_string()
    } else {
        endpoints
            .iter()
            .map(|e| format!("- {} {} {}", e.signature, e.visibility, e.mutability))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"Write a {framework} JavaScript test file that demonstrates the following security
findings in `{path}`. Each test should deploy the contract, exercise the vulnerable path and
assert the unsafe behavior. Use ethers and chai.

Test file path: {test_path}

Findings:
{findings}

Callable functions:
{endpoints}

Source:
```solidity
{source}
```

Read other project files with the file tools if the contract depends on them. Write the
complete test file with the write_file tool at the path above, then reply with a one-line
summary.
"#,
        framework = framework,
        test_path = test_path,
        path = contract.relative_display(),
        findings = findings_text.join("\n"),
        endpoints = endpoints_text,
        source = source,
    )
}
