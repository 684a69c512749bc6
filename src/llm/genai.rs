//! GenAI-based client
//!
//! Uses the `genai` crate for a single interface over the hosted providers
//! (Anthropic, Gemini, OpenAI and friends) with tool calling support.

use super::client::LLMClient;
use super::error::BackendError;
use super::types::{ChatMessage, LLMRequest, LLMResponse, MessageRole, ToolCall, ToolDefinition};
use async_trait::async_trait;
use genai::adapter::AdapterKind;
use genai::chat::{
    ChatMessage as GenAIChatMessage, ChatOptions, ChatRequest as GenAIChatRequest, MessageContent,
    Tool as GenAITool, ToolResponse,
};
use genai::resolver::{AuthData, Endpoint, ServiceTargetResolver};
use genai::{Client, ModelIden, ServiceTarget};
use std::time::Duration;
use tracing::{debug, error};

/// Overrides the provider endpoint, e.g. for a local proxy
pub const API_BASE_URL_ENV: &str = "ARGUS_API_BASE_URL";

pub struct GenAIClient {
    client: Client,
    model: String,
    provider: AdapterKind,
    timeout: Duration,
}

impl GenAIClient {
    /// Creates a client for `model` on `provider`
    ///
    /// `api_key_env` names the environment variable holding the key. When it
    /// is `None` the provider's default variable is used.
    pub fn new(
        provider: AdapterKind,
        model: impl Into<String>,
        timeout: Duration,
        api_key_env: Option<String>,
    ) -> Result<Self, BackendError> {
        let model = model.into();
        if model.is_empty() {
            return Err(BackendError::ConfigurationError {
                message: format!("No model configured for {}", provider.as_str()),
            });
        }

        let custom_endpoint = std::env::var(API_BASE_URL_ENV).ok();
        let model_clone = model.clone();

        let resolver = ServiceTargetResolver::from_resolver_fn(
            move |mut target: ServiceTarget| -> Result<ServiceTarget, genai::resolver::Error> {
                if let Some(ref url) = custom_endpoint {
                    target.endpoint = Endpoint::from_owned(url.clone());
                }
                let key_var = api_key_env
                    .as_deref()
                    .or_else(|| provider.default_key_env_name());
                target.auth = match key_var {
                    Some(var) => AuthData::from_env(var),
                    None => AuthData::from_single(""),
                };
                target.model = ModelIden::new(provider, &model_clone);
                Ok(target)
            },
        );

        let client = Client::builder()
            .with_service_target_resolver(resolver)
            .build();

        debug!(
            provider = provider.as_str(),
            model = %model,
            timeout_secs = timeout.as_secs(),
            "Creating GenAI client"
        );

        Ok(Self {
            client,
            model,
            provider,
            timeout,
        })
    }

    fn convert_message(&self, msg: &ChatMessage) -> GenAIChatMessage {
        match msg.role {
            MessageRole::System => GenAIChatMessage::system(&msg.content),
            MessageRole::User => GenAIChatMessage::user(&msg.content),
            MessageRole::Assistant => match msg.tool_calls {
                Some(ref tool_calls) if !tool_calls.is_empty() => {
                    let genai_calls: Vec<genai::chat::ToolCall> = tool_calls
                        .iter()
                        .map(|tc| genai::chat::ToolCall {
                            call_id: tc.call_id.clone(),
                            fn_name: tc.name.clone(),
                            fn_arguments: tc.arguments.clone(),
                        })
                        .collect();
                    GenAIChatMessage::assistant(MessageContent::from_tool_calls(genai_calls))
                }
                _ => GenAIChatMessage::assistant(&msg.content),
            },
            MessageRole::Tool => ToolResponse {
                call_id: msg.tool_call_id.clone().unwrap_or_default(),
                content: msg.content.clone(),
            }
            .into(),
        }
    }

    fn convert_tool(&self, tool: &ToolDefinition) -> GenAITool {
        GenAITool::new(&tool.name)
            .with_description(&tool.description)
            .with_schema(tool.parameters.clone())
    }
}

/// Maps a provider failure onto the backend error taxonomy
fn classify_error(provider: AdapterKind, err: genai::Error) -> BackendError {
    let message = format!("{} request failed: {}", provider.as_str(), err);
    let lower = message.to_lowercase();
    let status_code = [429u16, 500, 502, 503, 504, 400, 401, 403, 404]
        .into_iter()
        .find(|code| lower.contains(&code.to_string()));

    if lower.contains("api key") || status_code == Some(401) || status_code == Some(403) {
        BackendError::AuthenticationError { message }
    } else if status_code == Some(429) || lower.contains("rate limit") {
        BackendError::RateLimitError { retry_after: None }
    } else if lower.contains("connect") || lower.contains("dns") {
        BackendError::NetworkError { message }
    } else {
        BackendError::ApiError {
            message,
            status_code,
        }
    }
}

#[async_trait]
impl LLMClient for GenAIClient {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, BackendError> {
        let start = std::time::Instant::now();

        let messages: Vec<GenAIChatMessage> = request
            .messages
            .iter()
            .map(|m| self.convert_message(m))
            .collect();
        let tools: Vec<GenAITool> = request.tools.iter().map(|t| self.convert_tool(t)).collect();

        let mut genai_request = GenAIChatRequest::new(messages);
        if !tools.is_empty() {
            genai_request = genai_request.with_tools(tools);
        }

        let mut options = ChatOptions::default();
        if let Some(temp) = request.temperature {
            options = options.with_temperature(temp as f64);
        }
        if let Some(max_tokens) = request.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }

        let response = match tokio::time::timeout(
            self.timeout,
            self.client
                .exec_chat(&self.model, genai_request, Some(&options)),
        )
        .await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                error!("{} API error: {}", self.provider.as_str(), e);
                return Err(classify_error(self.provider, e));
            }
            Err(_) => {
                error!(
                    "{} request timed out after {}s",
                    self.provider.as_str(),
                    self.timeout.as_secs()
                );
                return Err(BackendError::TimeoutError {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let content = response.first_text().unwrap_or_default().to_string();
        let tool_calls: Vec<ToolCall> = response
            .tool_calls()
            .into_iter()
            .map(|tc| {
                ToolCall::new(tc.call_id.clone(), tc.fn_name.clone(), tc.fn_arguments.clone())
            })
            .collect();

        Ok(LLMResponse::with_tool_calls(
            content,
            tool_calls,
            start.elapsed(),
        ))
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }

    fn model_info(&self) -> Option<String> {
        Some(self.model.clone())
    }
}

impl std::fmt::Debug for GenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenAIClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genai_client_creation() {
        let client = GenAIClient::new(
            AdapterKind::Anthropic,
            "claude-sonnet-4-20250514",
            Duration::from_secs(30),
            Some("ANTHROPIC_API_KEY".to_string()),
        )
        .unwrap();

        assert_eq!(client.name(), "Anthropic");
        assert_eq!(
            client.model_info(),
            Some("claude-sonnet-4-20250514".to_string())
        );
    }

    #[test]
    fn test_empty_model_rejected() {
        let result = GenAIClient::new(AdapterKind::Gemini, "", Duration::from_secs(30), None);
        assert!(matches!(
            result,
            Err(BackendError::ConfigurationError { .. })
        ));
    }
}
