use crate::llm::{BackendError, ChatMessage, LLMClient, LLMRequest};
use crate::pipeline::phase::{PhaseError, PhaseId};
use crate::pipeline::record::{Finding, Severity};
use crate::util::RetryPolicy;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a smart contract security auditor. \
    Answer precisely and only in the format requested.";

/// A finding as a model reports it; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelFinding {
    pub title: String,
    pub severity: String,
    pub description: String,
    /// Contract the finding belongs to, when the answer covers several
    pub contract: Option<String>,
    pub location: Option<Value>,
    pub recommendation: Option<String>,
    pub tool: Option<String>,
}

impl ModelFinding {
    pub fn into_finding(self, source: PhaseId, unit: &str) -> Finding {
        let title = if self.title.trim().is_empty() {
            "Untitled finding".to_string()
        } else {
            self.title.trim().to_string()
        };
        let mut finding = Finding::new(
            source,
            unit,
            title,
            Severity::parse_lenient(&self.severity),
            self.description.trim(),
        );
        finding.location = self.location.and_then(|location| match location {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(format!("line {}", n)),
            other => Some(other.to_string()),
        });
        finding.recommendation = self.recommendation.filter(|r| !r.trim().is_empty());
        finding.tool = self.tool.filter(|t| !t.trim().is_empty());
        finding
    }
}

/// Resolves a contract name given by a model against the known contracts
///
/// Matches with or without the `.sol` extension, by file name or by path.
pub fn match_contract(reported: &str, known: &[String]) -> Option<String> {
    let normalize = |name: &str| {
        let name = name.trim().replace('\\', "/");
        let base = name.rsplit('/').next().unwrap_or(&name).to_string();
        base.strip_suffix(".sol").unwrap_or(&base).to_lowercase()
    };
    let wanted = reported.trim();
    if wanted.is_empty() {
        return None;
    }
    if let Some(exact) = known.iter().find(|k| k.as_str() == wanted) {
        return Some(exact.clone());
    }
    let wanted = normalize(wanted);
    known.iter().find(|k| normalize(k) == wanted).cloned()
}

/// Strips a markdown code fence around the payload, if there is one
pub fn extract_json_from_markdown(content: &str) -> &str {
    let trimmed = content.trim();

    if let Some(start_idx) = trimmed.find("```json") {
        let after_fence = &trimmed[start_idx + 7..];
        if let Some(end_idx) = after_fence.find("```") {
            return after_fence[..end_idx].trim();
        }
    }

    if let Some(start_idx) = trimmed.find("```") {
        let after_fence = &trimmed[start_idx + 3..];
        // Skip a language tag on the fence line
        let body = match after_fence.find('\n') {
            Some(nl) if !after_fence[..nl].trim().contains(' ') => &after_fence[nl + 1..],
            _ => after_fence,
        };
        if let Some(end_idx) = body.find("```") {
            return body[..end_idx].trim();
        }
    }

    trimmed
}

/// Parses a model answer as `T`, tolerating a markdown fence
pub fn parse_json<T: DeserializeOwned>(content: &str, label: &str) -> Result<T, PhaseError> {
    let json = extract_json_from_markdown(content);
    serde_json::from_str(json).map_err(|e| {
        PhaseError::Backend(BackendError::InvalidResponse {
            message: format!("Failed to parse {} response: {}", label, e),
            raw_response: Some(content.to_string()),
        })
    })
}

/// Sends one prompt, retrying transient service failures
///
/// A failure that outlasts `retry` comes back marked exhausted.
pub async fn query_text(
    client: &dyn LLMClient,
    prompt: String,
    max_tokens: u32,
    label: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<String, PhaseError> {
    let start = Instant::now();
    let request = LLMRequest::new(vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ])
    .with_temperature(0.1)
    .with_max_tokens(max_tokens);

    let response = retry
        .run(label, Some(cancel), BackendError::is_transient, |_| {
            client.chat(request.clone())
        })
        .await
        .map_err(|e| PhaseError::from(e).exhausted())?;

    debug!(
        query = label,
        latency_ms = start.elapsed().as_millis() as u64,
        chars = response.content.len(),
        "LLM query complete"
    );
    Ok(response.content)
}

pub async fn query_json<T: DeserializeOwned>(
    client: &dyn LLMClient,
    prompt: String,
    max_tokens: u32,
    label: &str,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<T, PhaseError> {
    let content = query_text(client, prompt, max_tokens, label, retry, cancel).await?;
    parse_json(&content, label)
}
