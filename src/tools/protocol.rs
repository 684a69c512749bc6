//! Tool-dispatch protocol
//!
//! `{tool_name, arguments}` in, `{success, payload, error, truncated}` out.
//! Both shapes are plain serde types so the same contract works for an
//! in-process call and over a channel.

use crate::error::{ErrorInfo, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Appended to a payload that was cut at the configured cap
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocationRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResponse {
    pub success: bool,
    /// Tool output; on failure, whatever partial output the tool produced
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// The payload was cut at the result cap
    #[serde(default)]
    pub truncated: bool,
}

impl ToolInvocationResponse {
    pub fn ok(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            truncated: false,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            error: Some(ErrorInfo::new(kind, message)),
            truncated: false,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Caps the payload at `max_chars` characters of its textual form.
    ///
    /// A payload over the cap is replaced by its text cut at a character
    /// boundary with [`TRUNCATION_MARKER`] appended, and `truncated` is set.
    pub fn truncate_to(mut self, max_chars: usize) -> Self {
        let text = match &self.payload {
            Value::String(s) => s.clone(),
            Value::Null => return self,
            other => other.to_string(),
        };
        if text.chars().count() <= max_chars {
            return self;
        }

        let cut = text
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());
        let mut kept = text[..cut].to_string();
        kept.push_str(TRUNCATION_MARKER);

        self.payload = Value::String(kept);
        self.truncated = true;
        self
    }

    /// Text handed back to a reasoning agent, and whether it was cut to fit
    pub fn to_model_text(&self, max_chars: usize) -> (String, bool) {
        let rendered = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"success\":{},\"error\":\"unserializable response\"}}",
                self.success
            )
        });
        if rendered.chars().count() <= max_chars {
            return (rendered, self.truncated);
        }
        let cut = rendered
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rendered.len());
        (format!("{}{}", &rendered[..cut], TRUNCATION_MARKER), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_payload_untouched() {
        let response = ToolInvocationResponse::ok(json!({"detectors": []})).truncate_to(100);
        assert!(!response.truncated);
        assert_eq!(response.payload, json!({"detectors": []}));
    }

    #[test]
    fn test_oversized_payload_truncated_with_marker() {
        let response = ToolInvocationResponse::ok(json!("a".repeat(500))).truncate_to(100);
        assert!(response.truncated);
        let text = response.payload.as_str().unwrap();
        assert!(text.ends_with(TRUNCATION_MARKER));
        assert_eq!(text.len(), 100 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let response = ToolInvocationResponse::ok(json!("é".repeat(20))).truncate_to(5);
        assert!(response.truncated);
        assert!(response.payload.as_str().unwrap().starts_with("ééééé\n"));
    }

    #[test]
    fn test_empty_result_is_not_truncated() {
        let response = ToolInvocationResponse::ok(json!("")).truncate_to(0);
        assert!(!response.truncated);
        assert_eq!(response.payload, json!(""));
    }

    #[test]
    fn test_wire_shape() {
        let response = ToolInvocationResponse::failure(ErrorKind::NotFound, "Unknown tool: x");
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["success"], false);
        assert_eq!(wire["error"]["kind"], "not_found");

        let request: ToolInvocationRequest =
            serde_json::from_value(json!({"tool_name": "slither"})).unwrap();
        assert!(request.arguments.is_empty());
    }
}
