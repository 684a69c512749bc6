//! LLM client abstraction layer
//!
//! Phases talk to the reasoning service through [`LLMClient`], so the genai
//! backend and the scripted mock used in tests are interchangeable.
//! [`ToolLoop`] drives a bounded tool-use conversation on top of a client
//! and the tool dispatcher.

mod client;
pub mod error;
mod genai;
mod mock;
mod selector;
mod tool_loop;
mod types;

pub use client::LLMClient;
pub use error::BackendError;
pub use genai::GenAIClient;
pub use mock::{MockLLMClient, MockResponse};
pub use selector::client_from_config;
pub use tool_loop::{InvocationRecord, ToolLoop, ToolLoopOutcome};
pub use types::{ChatMessage, LLMRequest, LLMResponse, MessageRole, ToolCall, ToolDefinition};
