use super::error::BackendError;
use super::types::{LLMRequest, LLMResponse};
use async_trait::async_trait;

/// Request/response access to an external reasoning service
///
/// Implementations bound every call by their own per-call timeout; retries
/// are the caller's business.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, BackendError>;

    fn name(&self) -> &str;

    fn model_info(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoClient;

    #[async_trait]
    impl LLMClient for EchoClient {
        async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, BackendError> {
            let text = request.last_user_message().unwrap_or_default().to_string();
            Ok(LLMResponse::text(text, Duration::from_millis(1)))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_client_trait_object() {
        let client: Box<dyn LLMClient> = Box::new(EchoClient);
        let response = client
            .chat(LLMRequest::new(vec![super::super::ChatMessage::user("ping")]))
            .await
            .unwrap();

        assert_eq!(response.content, "ping");
        assert_eq!(client.name(), "echo");
        assert!(client.model_info().is_none());
    }
}
