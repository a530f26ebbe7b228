//! JSON-RPC 2.0 envelopes for the session transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use groundtruth_common::error::{GroundTruthError, Result};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request. Notifications carry no id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl RpcRequest {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: None,
            id: None,
        }
    }

    pub fn initialize(client_name: &str, client_version: &str) -> Self {
        Self::new(
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": client_name, "version": client_version},
            })),
        )
    }

    pub fn tool_call(name: &str, arguments: &Value) -> Self {
        Self::new(
            "tools/call",
            Some(serde_json::json!({"name": name, "arguments": arguments})),
        )
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One item of a `tools/call` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCallPayload {
    #[serde(default)]
    content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

impl RpcResponse {
    /// Parse a response body, plain JSON or `text/event-stream` framed
    pub fn from_body(body: &str) -> Result<Self> {
        let trimmed = body.trim();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed)
                .map_err(|e| GroundTruthError::Protocol(format!("malformed envelope: {}", e)));
        }
        let events = sse_data(trimmed);
        // Last complete envelope wins; earlier events may be progress notices
        events
            .iter()
            .rev()
            .find_map(|data| serde_json::from_str::<RpcResponse>(data).ok())
            .ok_or_else(|| {
                GroundTruthError::Protocol("no JSON-RPC envelope in response body".to_string())
            })
    }

    /// Unwrap `result`, mapping a JSON-RPC error to an engine error
    pub fn into_result(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(GroundTruthError::Engine(format!(
                "{} (code {})",
                err.message, err.code
            )));
        }
        self.result
            .ok_or_else(|| GroundTruthError::Protocol("response has neither result nor error".to_string()))
    }

    /// Decode a `tools/call` result: the first text item, itself JSON
    pub fn into_tool_output(self) -> Result<Value> {
        let result = self.into_result()?;
        let payload: ToolCallPayload = serde_json::from_value(result)
            .map_err(|e| GroundTruthError::Protocol(format!("unexpected tool result: {}", e)))?;
        let text = payload
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .find_map(|c| c.text.clone())
            .ok_or_else(|| GroundTruthError::Protocol("tool result has no text content".to_string()))?;
        if payload.is_error {
            return Err(GroundTruthError::Engine(text));
        }
        serde_json::from_str(&text)
            .map_err(|e| GroundTruthError::Protocol(format!("tool text is not JSON: {}", e)))
    }
}

/// Payloads of `data:` lines, one per event (multi-line data joined by `\n`)
pub fn sse_data(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                events.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        events.push(current.join("\n"));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_has_no_id() {
        let n = RpcRequest::notification("notifications/initialized");
        let json = serde_json::to_value(&n).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["method"], "notifications/initialized");
    }

    #[test]
    fn test_tool_output_parses_text_as_json() {
        let body = r#"{"jsonrpc":"2.0","id":"1","result":{"content":[{"type":"text","text":"{\"bestMove\":\"8/5 6/5\"}"}]}}"#;
        let out = RpcResponse::from_body(body).unwrap().into_tool_output().unwrap();
        assert_eq!(out["bestMove"], "8/5 6/5");
    }

    #[test]
    fn test_sse_framed_body() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":{\"ok\":true}}\n\n";
        let resp = RpcResponse::from_body(body).unwrap();
        assert_eq!(resp.into_result().unwrap()["ok"], true);
    }

    #[test]
    fn test_rpc_error_is_engine_error() {
        let body = r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32602,"message":"bad dice"}}"#;
        let err = RpcResponse::from_body(body).unwrap().into_result().unwrap_err();
        assert_eq!(err.code(), "engine");
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_garbage_body_is_protocol_error() {
        let err = RpcResponse::from_body("<html>502</html>").unwrap_err();
        assert_eq!(err.code(), "protocol");
    }
}
