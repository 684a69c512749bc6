use super::client::LLMClient;
use super::error::BackendError;
use super::types::{LLMRequest, LLMResponse, ToolCall};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

type Responder = Box<dyn Fn(&LLMRequest) -> Option<MockResponse> + Send + Sync>;

/// Deterministic stand-in for a reasoning service
///
/// Requests are answered by the responder function when it returns a
/// response, otherwise from the FIFO queue. Every request is recorded.
pub struct MockLLMClient {
    responses: Mutex<VecDeque<MockResponse>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<LLMRequest>>,
    name: String,
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub error: Option<BackendError>,
}

impl MockResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            error: None,
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            error: None,
        }
    }

    pub fn error(error: BackendError) -> Self {
        Self {
            content: String::new(),
            tool_calls: Vec::new(),
            error: Some(error),
        }
    }
}

impl MockLLMClient {
    pub fn new() -> Self {
        Self::with_name("MockLLM")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            responder: None,
            requests: Mutex::new(Vec::new()),
            name: name.into(),
        }
    }

    /// Routes requests through `responder` before falling back to the queue
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&LLMRequest) -> Option<MockResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    pub fn add_response(&self, response: MockResponse) {
        self.queue().push_back(response);
    }

    pub fn add_responses(&self, responses: impl IntoIterator<Item = MockResponse>) {
        self.queue().extend(responses);
    }

    pub fn remaining_responses(&self) -> usize {
        self.queue().len()
    }

    /// Requests received so far, in arrival order
    pub fn requests(&self) -> Vec<LLMRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        name: &str,
        arguments: serde_json::Value,
    ) -> ToolCall {
        ToolCall::new(call_id, name, arguments)
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<MockResponse>> {
        self.responses.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockLLMClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, BackendError> {
        let routed = self.responder.as_ref().and_then(|f| f(&request));
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let response = match routed {
            Some(response) => response,
            None => self.queue().pop_front().ok_or_else(|| BackendError::Other {
                message: "MockLLMClient: No more responses in queue".to_string(),
            })?,
        };

        if let Some(error) = response.error {
            return Err(error);
        }

        Ok(LLMResponse::with_tool_calls(
            response.content,
            response.tool_calls,
            Duration::from_millis(10),
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model_info(&self) -> Option<String> {
        Some("mock-model".to_string())
    }
}

impl std::fmt::Debug for MockLLMClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLLMClient")
            .field("name", &self.name)
            .field("remaining_responses", &self.remaining_responses())
            .field("has_responder", &self.responder.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use serde_json::json;

    #[tokio::test]
    async fn test_queue_in_order() {
        let client = MockLLMClient::new();
        client.add_responses(vec![MockResponse::text("First"), MockResponse::text("Second")]);
        assert_eq!(client.remaining_responses(), 2);

        let r1 = client.chat(LLMRequest::new(vec![])).await.unwrap();
        let r2 = client.chat(LLMRequest::new(vec![])).await.unwrap();

        assert_eq!(r1.content, "First");
        assert_eq!(r2.content, "Second");
        assert_eq!(client.request_count(), 2);
    }

    #[tokio::test]
    async fn test_all_tool_calls_are_returned() {
        let client = MockLLMClient::new();
        client.add_response(MockResponse::with_tool_calls(
            "",
            vec![
                MockLLMClient::tool_call("c1", "slither", json!({"target": "A.sol"})),
                MockLLMClient::tool_call("c2", "mythril", json!({"target": "A.sol"})),
            ],
        ));

        let response = client.chat(LLMRequest::new(vec![])).await.unwrap();
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[1].name, "mythril");
    }

    #[tokio::test]
    async fn test_error_and_exhaustion() {
        let client = MockLLMClient::new();
        client.add_response(MockResponse::error(BackendError::TimeoutError { seconds: 30 }));

        let first = client.chat(LLMRequest::new(vec![])).await;
        assert!(matches!(first, Err(BackendError::TimeoutError { seconds: 30 })));

        let second = client.chat(LLMRequest::new(vec![])).await;
        assert!(matches!(second, Err(BackendError::Other { .. })));
    }

    #[tokio::test]
    async fn test_responder_routes_by_content() {
        let client = MockLLMClient::with_responder(|request| {
            let prompt = request.last_user_message()?;
            prompt
                .contains("Vault")
                .then(|| MockResponse::text("vault answer"))
        });
        client.add_response(MockResponse::text("queued"));

        let vault = client
            .chat(LLMRequest::new(vec![ChatMessage::user("analyze Vault.sol")]))
            .await
            .unwrap();
        let other = client
            .chat(LLMRequest::new(vec![ChatMessage::user("analyze Token.sol")]))
            .await
            .unwrap();

        assert_eq!(vault.content, "vault answer");
        assert_eq!(other.content, "queued");
    }
}
