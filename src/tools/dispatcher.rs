//! Uniform invocation of registered tools
//!
//! [`ToolDispatcher::invoke`] never fails: unknown names, bad arguments,
//! handler errors and handler panics all come back as a
//! [`ToolInvocationResponse`] with `error` set, so a caller's loop keeps going
//! whatever one tool does.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::protocol::{ToolInvocationRequest, ToolInvocationResponse};
use super::registry::ToolRegistry;
use crate::error::ErrorKind;
use crate::llm::ToolDefinition;

pub struct ToolDispatcher {
    registry: ToolRegistry,
    max_result_length: usize,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, max_result_length: usize) -> Self {
        Self {
            registry,
            max_result_length,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn max_result_length(&self) -> usize {
        self.max_result_length
    }

    pub fn tool_definitions(&self, only: Option<&[&str]>) -> Vec<ToolDefinition> {
        self.registry.as_tool_definitions(only)
    }

    pub async fn dispatch(&self, request: ToolInvocationRequest) -> ToolInvocationResponse {
        self.invoke(&request.tool_name, Value::Object(request.arguments))
            .await
    }

    /// Resolves, validates and runs `name`
    pub async fn invoke(&self, name: &str, arguments: Value) -> ToolInvocationResponse {
        let Some(tool) = self.registry.get(name) else {
            warn!(tool = name, "Unknown tool requested");
            return ToolInvocationResponse::failure(
                ErrorKind::NotFound,
                format!("Unknown tool: {}", name),
            );
        };

        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            other => {
                return ToolInvocationResponse::failure(
                    ErrorKind::InvalidArguments,
                    format!("Arguments must be a JSON object, got {}", json_type(&other)),
                );
            }
        };

        if let Err(reason) = tool.schema().validate(&arguments) {
            debug!(tool = name, reason = %reason, "Rejected tool arguments");
            return ToolInvocationResponse::failure(ErrorKind::InvalidArguments, reason);
        }

        info!(tool = name, "Executing tool");

        // A panicking handler must not take the caller down with it
        let handle = tokio::spawn(async move { tool.execute(arguments).await });
        let response = match handle.await {
            Ok(Ok(payload)) => {
                info!(tool = name, "Tool execution completed");
                ToolInvocationResponse::ok(payload)
            }
            Ok(Err(e)) => {
                warn!(tool = name, kind = %e.kind(), error = %e, "Tool execution failed");
                let partial = e.partial_payload().cloned().unwrap_or(Value::Null);
                ToolInvocationResponse::failure(e.kind(), e.to_string()).with_payload(partial)
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    format!("Tool '{}' panicked", name)
                } else {
                    format!("Tool '{}' was cancelled", name)
                };
                warn!(tool = name, "{}", message);
                ToolInvocationResponse::failure(ErrorKind::Internal, message)
            }
        };

        let response = response.truncate_to(self.max_result_length);
        if response.truncated {
            debug!(
                tool = name,
                max_chars = self.max_result_length,
                "Tool result truncated"
            );
        }
        response
    }

    /// Serves requests arriving over a channel until every handle is dropped
    pub fn spawn_channel(self: Arc<Self>, buffer: usize) -> DispatchHandle {
        let (tx, mut rx) = mpsc::channel::<DispatchMessage>(buffer.max(1));
        tokio::spawn(async move {
            while let Some((request, reply)) = rx.recv().await {
                let response = self.dispatch(request).await;
                if reply.send(response).is_err() {
                    debug!("Dispatch caller went away before the response was ready");
                }
            }
            debug!("Dispatch channel closed");
        });
        DispatchHandle { tx }
    }
}

type DispatchMessage = (ToolInvocationRequest, oneshot::Sender<ToolInvocationResponse>);

/// Sending side of a channel-served dispatcher
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<DispatchMessage>,
}

impl DispatchHandle {
    pub async fn invoke(&self, request: ToolInvocationRequest) -> ToolInvocationResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((request, reply_tx)).await.is_err() {
            return ToolInvocationResponse::failure(
                ErrorKind::Internal,
                "Dispatcher is not running",
            );
        }
        reply_rx.await.unwrap_or_else(|_| {
            ToolInvocationResponse::failure(ErrorKind::Internal, "Dispatcher dropped the request")
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("registry", &self.registry)
            .field("max_result_length", &self.max_result_length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ArgumentSchema, ArgumentType, Tool, ToolError, ToolKind};
    use async_trait::async_trait;
    use serde_json::{json, Map};

    struct Echo(ArgumentSchema);

    #[async_trait]
    impl Tool for Echo {
        fn description(&self) -> &str {
            "Echoes its text argument"
        }
        fn kind(&self) -> ToolKind {
            ToolKind::InProcess
        }
        fn schema(&self) -> &ArgumentSchema {
            &self.0
        }
        async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
            match arguments.get("text").and_then(Value::as_str) {
                Some("panic") => panic!("handler blew up"),
                Some("fail") => Err(ToolError::ExecutionFailed {
                    exit_code: Some(2),
                    payload: json!({"stderr": "bad input"}),
                }),
                Some(text) => Ok(json!(text)),
                None => Ok(Value::Null),
            }
        }
    }

    fn dispatcher(max: usize) -> ToolDispatcher {
        let mut builder = ToolRegistry::builder();
        builder
            .register(
                "echo",
                Arc::new(Echo(ArgumentSchema::new().required(
                    "text",
                    ArgumentType::String,
                    "Text",
                ))),
            )
            .unwrap();
        ToolDispatcher::new(builder.build(), max)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let response = dispatcher(100).invoke("unknown_tool", json!({})).await;
        assert!(!response.success);
        assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_schema_violation() {
        let d = dispatcher(100);
        let missing = d.invoke("echo", json!({})).await;
        assert_eq!(missing.error_kind(), Some(ErrorKind::InvalidArguments));

        let not_object = d.invoke("echo", json!(["text"])).await;
        assert_eq!(not_object.error_kind(), Some(ErrorKind::InvalidArguments));
        assert!(not_object.error.unwrap().message.contains("array"));
    }

    #[tokio::test]
    async fn test_handler_failure_keeps_partial_payload() {
        let response = dispatcher(100).invoke("echo", json!({"text": "fail"})).await;
        assert!(!response.success);
        assert_eq!(response.error_kind(), Some(ErrorKind::ToolExecutionFailure));
        assert_eq!(response.payload["stderr"], "bad input");
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let response = dispatcher(100).invoke("echo", json!({"text": "panic"})).await;
        assert!(!response.success);
        assert_eq!(response.error_kind(), Some(ErrorKind::Internal));
    }

    #[tokio::test]
    async fn test_result_capped() {
        let long = "x".repeat(64);
        let response = dispatcher(16).invoke("echo", json!({"text": long})).await;
        assert!(response.success);
        assert!(response.truncated);
    }

    #[tokio::test]
    async fn test_channel_transport() {
        let handle = Arc::new(dispatcher(100)).spawn_channel(4);
        let mut args = Map::new();
        args.insert("text".into(), json!("hello"));

        let response = handle
            .invoke(ToolInvocationRequest::new("echo", args))
            .await;
        assert!(response.success);
        assert_eq!(response.payload, json!("hello"));

        let missing = handle
            .invoke(ToolInvocationRequest::new("nope", Map::new()))
            .await;
        assert_eq!(missing.error_kind(), Some(ErrorKind::NotFound));
    }
}
