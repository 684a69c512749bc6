//! Bounded tool-use conversation between a reasoning service and the
//! dispatcher

use super::client::LLMClient;
use super::error::BackendError;
use super::types::{ChatMessage, LLMRequest, LLMResponse};
use crate::error::ErrorKind;
use crate::tools::ToolDispatcher;
use crate::util::RetryPolicy;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One tool call made during the loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRecord {
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct ToolLoopOutcome {
    /// The model's last text answer
    pub final_content: String,
    pub iterations: usize,
    pub invocations: Vec<InvocationRecord>,
    /// The iteration limit was hit and a final answer was forced
    pub exhausted: bool,
    /// Cancellation stopped the loop; `final_content` is empty
    pub cancelled: bool,
}

pub struct ToolLoop<'a> {
    client: &'a dyn LLMClient,
    dispatcher: &'a ToolDispatcher,
    tools: Option<&'a [&'a str]>,
    max_iterations: usize,
    max_tool_result_length: usize,
    temperature: Option<f32>,
    retry: RetryPolicy,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> ToolLoop<'a> {
    pub fn new(client: &'a dyn LLMClient, dispatcher: &'a ToolDispatcher) -> Self {
        Self {
            client,
            dispatcher,
            tools: None,
            max_iterations: 20,
            max_tool_result_length: dispatcher.max_result_length(),
            temperature: None,
            retry: RetryPolicy::none(),
            cancel: None,
        }
    }

    /// Offers only the named tools to the model
    pub fn with_tools(mut self, tools: &'a [&'a str]) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Cap on the tool result text fed back to the model
    pub fn with_max_tool_result_length(mut self, max: usize) -> Self {
        self.max_tool_result_length = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Retries transient service failures of each request with `retry`
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checked before every request and every tool call
    ///
    /// A tool call that already started runs to completion, so containers
    /// it launched are cleaned up before the loop returns.
    pub fn with_cancellation(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }

    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, BackendError> {
        self.retry
            .run("tool_loop", self.cancel, BackendError::is_transient, |_| {
                self.client.chat(request.clone())
            })
            .await
    }

    fn cancelled(iterations: usize, invocations: Vec<InvocationRecord>) -> ToolLoopOutcome {
        warn!(iterations, tool_calls = invocations.len(), "Tool loop cancelled");
        ToolLoopOutcome {
            final_content: String::new(),
            iterations,
            invocations,
            exhausted: false,
            cancelled: true,
        }
    }

    fn request(&self, messages: &[ChatMessage], with_tools: bool) -> LLMRequest {
        let mut request = LLMRequest::new(messages.to_vec());
        if with_tools {
            request = request.with_tools(self.dispatcher.tool_definitions(self.tools));
        }
        if let Some(t) = self.temperature {
            request = request.with_temperature(t);
        }
        request
    }

    /// Runs until the model answers without tool calls, or until the
    /// iteration limit, after which one last request without tools asks for
    /// the final answer.
    ///
    /// Tool failures are fed back to the model; only reasoning service
    /// errors end the loop early.
    pub async fn run(
        &self,
        mut messages: Vec<ChatMessage>,
    ) -> Result<ToolLoopOutcome, BackendError> {
        let mut invocations = Vec::new();

        for iteration in 1..=self.max_iterations {
            if self.is_cancelled() {
                return Ok(Self::cancelled(iteration - 1, invocations));
            }
            debug!(iteration, max_iterations = self.max_iterations, "Tool loop iteration");
            let response = self.chat(self.request(&messages, true)).await?;

            if !response.has_tool_calls() {
                info!(iterations = iteration, tool_calls = invocations.len(), "Tool loop finished");
                return Ok(ToolLoopOutcome {
                    final_content: response.content,
                    iterations: iteration,
                    invocations,
                    exhausted: false,
                    cancelled: false,
                });
            }

            messages.push(ChatMessage::assistant_with_tools(
                &response.content,
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                if self.is_cancelled() {
                    return Ok(Self::cancelled(iteration, invocations));
                }
                debug!(tool = %call.name, call_id = %call.call_id, "Dispatching tool call");
                let result = self.dispatcher.invoke(&call.name, call.arguments.clone()).await;
                let (text, truncated) = result.to_model_text(self.max_tool_result_length);
                invocations.push(InvocationRecord {
                    tool: call.name.clone(),
                    success: result.success,
                    error_kind: result.error_kind(),
                    truncated,
                });
                messages.push(ChatMessage::tool_response(&call.call_id, text));
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            "Tool loop reached its iteration limit, requesting a final answer"
        );
        messages.push(ChatMessage::user(
            "The tool budget is exhausted. Give your final answer now using the results you have.",
        ));
        if self.is_cancelled() {
            return Ok(Self::cancelled(self.max_iterations, invocations));
        }
        let response = self.chat(self.request(&messages, false)).await?;

        Ok(ToolLoopOutcome {
            final_content: response.content,
            iterations: self.max_iterations + 1,
            invocations,
            exhausted: true,
            cancelled: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLLMClient, MockResponse, ToolCall};
    use crate::tools::{ArgumentSchema, ArgumentType, Tool, ToolError, ToolKind, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;
    use std::time::Duration;

    struct Lines(ArgumentSchema);

    #[async_trait]
    impl Tool for Lines {
        fn description(&self) -> &str {
            "Returns n characters"
        }
        fn kind(&self) -> ToolKind {
            ToolKind::InProcess
        }
        fn schema(&self) -> &ArgumentSchema {
            &self.0
        }
        async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
            let n = arguments.get("n").and_then(Value::as_u64).unwrap_or(1) as usize;
            Ok(json!("x".repeat(n)))
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut builder = ToolRegistry::builder();
        builder
            .register(
                "lines",
                Arc::new(Lines(ArgumentSchema::new().required(
                    "n",
                    ArgumentType::Integer,
                    "Count",
                ))),
            )
            .unwrap();
        ToolDispatcher::new(builder.build(), 10_000)
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args)
    }

    #[tokio::test]
    async fn test_tool_results_are_fed_back() {
        let client = MockLLMClient::new();
        client.add_responses(vec![
            MockResponse::with_tool_calls(
                "",
                vec![
                    call("1", "lines", json!({"n": 3})),
                    call("2", "unknown_tool", json!({})),
                ],
            ),
            MockResponse::text("{\"findings\": []}"),
        ]);
        let d = dispatcher();

        let outcome = ToolLoop::new(&client, &d)
            .run(vec![ChatMessage::user("analyze")])
            .await
            .unwrap();

        assert_eq!(outcome.final_content, "{\"findings\": []}");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.invocations.len(), 2);
        assert!(outcome.invocations[0].success);
        assert_eq!(outcome.invocations[1].error_kind, Some(ErrorKind::NotFound));

        let second = &client.requests()[1];
        let tool_messages: Vec<_> = second
            .messages
            .iter()
            .filter(|m| m.tool_call_id.is_some())
            .collect();
        assert_eq!(tool_messages.len(), 2);
        assert!(tool_messages[1].content.contains("not_found"));
    }

    #[tokio::test]
    async fn test_iteration_limit_forces_final_answer() {
        let client = MockLLMClient::new();
        client.add_responses(vec![
            MockResponse::with_tool_calls("", vec![call("1", "lines", json!({"n": 1}))]),
            MockResponse::with_tool_calls("", vec![call("2", "lines", json!({"n": 1}))]),
            MockResponse::text("final"),
        ]);
        let d = dispatcher();

        let outcome = ToolLoop::new(&client, &d)
            .with_max_iterations(2)
            .run(vec![ChatMessage::user("analyze")])
            .await
            .unwrap();

        assert!(outcome.exhausted);
        assert_eq!(outcome.final_content, "final");
        assert!(client.requests()[2].tools.is_empty());
    }

    #[tokio::test]
    async fn test_tool_results_truncated_for_model() {
        let client = MockLLMClient::new();
        client.add_responses(vec![
            MockResponse::with_tool_calls("", vec![call("1", "lines", json!({"n": 500}))]),
            MockResponse::text("done"),
        ]);
        let d = dispatcher();

        let outcome = ToolLoop::new(&client, &d)
            .with_max_tool_result_length(100)
            .run(vec![ChatMessage::user("analyze")])
            .await
            .unwrap();

        assert!(outcome.invocations[0].truncated);
        let fed_back = client.requests()[1]
            .messages
            .iter()
            .find(|m| m.tool_call_id.is_some())
            .map(|m| m.content.clone())
            .unwrap();
        assert!(fed_back.ends_with(crate::tools::TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_transient_errors_retried_per_request() {
        let client = MockLLMClient::new();
        client.add_responses(vec![
            MockResponse::error(BackendError::RateLimitError { retry_after: None }),
            MockResponse::with_tool_calls("", vec![call("1", "lines", json!({"n": 1}))]),
            MockResponse::error(BackendError::TimeoutError { seconds: 1 }),
            MockResponse::text("done"),
        ]);
        let d = dispatcher();
        let retry = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1));

        let outcome = ToolLoop::new(&client, &d)
            .with_retry(retry)
            .run(vec![ChatMessage::user("analyze")])
            .await
            .unwrap();

        assert_eq!(outcome.final_content, "done");
        assert_eq!(outcome.invocations.len(), 1);
        assert_eq!(client.request_count(), 4);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_tool_call() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let client = MockLLMClient::with_responder(move |_| {
            trigger.cancel();
            Some(MockResponse::with_tool_calls(
                "",
                vec![call("1", "lines", json!({"n": 1}))],
            ))
        });
        let d = dispatcher();

        let outcome = ToolLoop::new(&client, &d)
            .with_cancellation(&token)
            .run(vec![ChatMessage::user("analyze")])
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.invocations.is_empty());
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let client = MockLLMClient::new();
        client.add_response(MockResponse::error(BackendError::TimeoutError { seconds: 1 }));
        let d = dispatcher();

        let result = ToolLoop::new(&client, &d)
            .run(vec![ChatMessage::user("analyze")])
            .await;
        assert!(matches!(result, Err(BackendError::TimeoutError { .. })));
    }
}
