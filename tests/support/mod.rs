//! Shared fixtures for integration tests
#![allow(dead_code)]

use argus::config::ArgusConfig;
use argus::docker::{InMemoryRuntime, ScriptedRun};
use argus::llm::{BackendError, LLMClient, LLMRequest, MessageRole, MockLLMClient, MockResponse};
use argus::pipeline::PhaseServices;
use argus::tools::{standard_registry, SandboxServices, ToolDispatcher};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const SLITHER_IMAGE: &str = "trailofbits/eth-security-toolbox:latest";
pub const MYTHRIL_IMAGE: &str = "mythril/myth:latest";

pub const VAULT_SOURCE: &str = r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.20;

contract Vault {
    mapping(address => uint256) public balances;

    function deposit() external payable {
        balances[msg.sender] += msg.value;
    }

    function withdraw(uint256 amount) external {
        require(balances[msg.sender] >= amount, "insufficient");
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok, "transfer failed");
        balances[msg.sender] -= amount;
    }
}
"#;

pub const TOKEN_SOURCE: &str = r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.20;

contract Token {
    mapping(address => uint256) public balanceOf;
    address public owner;

    function mint(address to, uint256 amount) external {
        balanceOf[to] += amount;
    }
}
"#;

pub const EXPLOIT_TEST: &str =
    "const { expect } = require(\"chai\");\ndescribe(\"exploit\", () => {});\n";

/// A Foundry-style project with two contracts and a README
pub fn solidity_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::write(root.join("foundry.toml"), "[profile.default]\nsrc = \"contracts\"\n").unwrap();
    fs::write(root.join("README.md"), "# Vault protocol\n\nUsers deposit ETH and withdraw it later.\n").unwrap();
    fs::create_dir_all(root.join("contracts")).unwrap();
    fs::write(root.join("contracts/Vault.sol"), VAULT_SOURCE).unwrap();
    fs::write(root.join("contracts/Token.sol"), TOKEN_SOURCE).unwrap();
    dir
}

/// A project with `count` trivial contracts named C1.sol .. Cn.sol
pub fn project_with_contracts(count: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    for i in 1..=count {
        fs::write(
            dir.path().join(format!("src/C{}.sol", i)),
            format!("pragma solidity ^0.8.0;\ncontract C{} {{}}\n", i),
        )
        .unwrap();
    }
    dir
}

/// Defaults with retries that do not slow tests down
pub fn fast_config() -> ArgusConfig {
    let mut config = ArgusConfig::default();
    config.orchestrator.retry_initial_delay_ms = 1;
    config.orchestrator.retry_max_delay_ms = 5;
    config
}

/// Runtime with both analyzer images present and successful runs by default
pub fn runtime_with_images() -> Arc<InMemoryRuntime> {
    let runtime = InMemoryRuntime::new()
        .with_image(SLITHER_IMAGE)
        .with_image(MYTHRIL_IMAGE);
    runtime.set_default_run(ScriptedRun::success(
        r#"{"success": true, "results": {"detectors": [{"check": "reentrancy-eth", "impact": "High"}]}}"#,
    ));
    Arc::new(runtime)
}

pub fn services(
    config: &ArgusConfig,
    project: &Path,
    output: &Path,
    llm: Arc<dyn LLMClient>,
    runtime: Option<Arc<InMemoryRuntime>>,
) -> PhaseServices {
    let sandbox = runtime.map(|r| SandboxServices::new(r, config));
    let registry = standard_registry(config, project, output, sandbox).unwrap();
    PhaseServices {
        analysis_llm: llm.clone(),
        generator_llm: llm,
        dispatcher: Arc::new(ToolDispatcher::new(registry, config.server.max_result_length)),
    }
}

fn has_tool_results(request: &LLMRequest) -> bool {
    request.messages.iter().any(|m| m.role == MessageRole::Tool)
}

/// Answers every prompt of the standard phases like a cooperative auditor
///
/// `Vault.sol` gets one high-severity reentrancy finding from per-file
/// analysis and one from static analysis, which calls slither once.
pub fn answer(request: &LLMRequest) -> Option<MockResponse> {
    let prompt = request.last_user_message()?;

    if prompt.contains("semantic analysis of the Solidity file") {
        let body = if prompt.contains("Vault.sol") {
            json!({
                "summary": "ETH vault with per-user balances",
                "findings": [{
                    "title": "Reentrancy in withdraw",
                    "severity": "high",
                    "description": "The balance is updated after the external call",
                    "location": "withdraw",
                    "recommendation": "Apply checks-effects-interactions"
                }],
                "classification": {"should_analyze_further": true, "confidence": 9, "complexity": "medium"}
            })
        } else {
            json!({
                "summary": "Mintable token",
                "findings": [{
                    "title": "Unrestricted mint",
                    "severity": "critical",
                    "description": "Anyone can mint tokens",
                    "location": "mint"
                }],
                "classification": {"should_analyze_further": true, "confidence": 8}
            })
        };
        return Some(MockResponse::text(body.to_string()));
    }

    if prompt.contains("Analyze this smart contract project as a whole") {
        return Some(MockResponse::text(
            json!({"overview": "Two independent contracts", "findings": []}).to_string(),
        ));
    }

    if prompt.contains("Analyze the interactions between these contracts") {
        return Some(MockResponse::text(
            json!({"overview": "No shared state", "findings": []}).to_string(),
        ));
    }

    if prompt.contains("Run static analysis on this Solidity project") {
        if !has_tool_results(request) {
            return Some(MockResponse::with_tool_calls(
                "",
                vec![MockLLMClient::tool_call(
                    "call-1",
                    "slither",
                    json!({"target": "contracts/Vault.sol"}),
                )],
            ));
        }
        let body = json!({
            "summary": "Slither confirms the reentrancy",
            "tool_executions": [{"tool": "slither", "target": "contracts/Vault.sol", "status": "success"}],
            "findings": [{
                "title": "reentrancy-eth",
                "severity": "high",
                "contract": "Vault.sol",
                "tool": "slither",
                "description": "Reentrancy in Vault.withdraw(uint256)",
                "location": "withdraw"
            }]
        });
        return Some(MockResponse::text(format!("```json\n{}\n```", body)));
    }

    if prompt.contains("List the externally callable functions") {
        let body = if prompt.contains("Vault.sol") {
            json!([
                {"name": "deposit", "signature": "deposit()", "visibility": "external", "mutability": "payable"},
                {"name": "withdraw", "signature": "withdraw(uint256)", "visibility": "external", "mutability": "nonpayable"}
            ])
        } else {
            json!({"endpoints": [
                {"name": "mint", "signature": "mint(address,uint256)", "visibility": "external", "mutability": "nonpayable"}
            ]})
        };
        return Some(MockResponse::text(body.to_string()));
    }

    if prompt.contains("JavaScript test file") {
        if has_tool_results(request) {
            return Some(MockResponse::text("Test file written"));
        }
        let path = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Test file path: "))?;
        return Some(MockResponse::with_tool_calls(
            "",
            vec![MockLLMClient::tool_call(
                "write-1",
                "write_file",
                json!({"path": path.trim(), "content": EXPLOIT_TEST}),
            )],
        ));
    }

    if prompt.contains("executive summary") {
        return Some(MockResponse::text(
            "The Vault is exposed to reentrancy and the Token can be minted by anyone.",
        ));
    }

    None
}

pub fn auditor() -> Arc<MockLLMClient> {
    Arc::new(MockLLMClient::with_responder(answer))
}

pub fn unavailable() -> MockResponse {
    MockResponse::error(BackendError::AuthenticationError {
        message: "invalid api key".to_string(),
    })
}
