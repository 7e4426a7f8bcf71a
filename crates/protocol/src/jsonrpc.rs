//! JSON-RPC 2.0 envelopes and the MCP-style tool/resource payloads.

use crate::ErrorEnvelope;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SERVER_NOT_INITIALIZED: i64 = -32002;

/// Inbound message. A missing `id` marks a notification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl JsonRpcRequest {
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl TextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Result of `tools/call`: a display part plus a machine-readable part.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<TextContent>,
    pub structured_content: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn ok(text: impl Into<String>, structured: Value) -> Self {
        Self {
            content: vec![TextContent::new(text)],
            structured_content: structured,
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(envelope: &ErrorEnvelope) -> Self {
        let mut text = format!("error: {}\n{}", envelope.code, envelope.message);
        if let Some(hint) = envelope.hint.as_deref().filter(|h| !h.trim().is_empty()) {
            text.push_str("\nhint: ");
            text.push_str(hint);
        }
        Self {
            content: vec![TextContent::new(text)],
            structured_content: json!({ "error": envelope }),
            is_error: true,
        }
    }

    /// Error envelope, when this result is an error.
    #[must_use]
    pub fn error_envelope(&self) -> Option<ErrorEnvelope> {
        if !self.is_error {
            return None;
        }
        serde_json::from_value(self.structured_content.get("error")?.clone()).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn notification_has_no_id() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialized"}"#).expect("parse");
        assert!(req.is_notification());
        assert!(req.params.is_null());
    }

    #[test]
    fn tool_error_result_exposes_envelope() {
        let env = ErrorEnvelope::new(ErrorCode::TaskNotFound, "no task 'abc'");
        let result = ToolCallResult::error(&env);
        let raw = serde_json::to_value(&result).expect("serialize");
        assert_eq!(raw["isError"], true);
        assert_eq!(raw["structuredContent"]["error"]["code"], "TaskNotFound");
        assert_eq!(raw["content"][0]["type"], "text");
        assert_eq!(
            result.error_envelope().map(|e| e.code),
            Some(ErrorCode::TaskNotFound)
        );
    }
}
