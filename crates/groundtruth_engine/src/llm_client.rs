//! Language-model completion client
//!
//! The model is a black box: it returns text, or asks to call a tool
//! first. `HttpCompletionClient` speaks the OpenAI-compatible chat API;
//! `FakeCompletionClient` replays scripted replies for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use groundtruth_common::config::LlmSettings;

/// LLM errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("LLM is disabled in configuration")]
    Disabled,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned empty response")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }

    /// OpenAI chat wire format
    fn to_wire(&self) -> Value {
        let mut msg = json!({"role": self.role, "content": self.content});
        if !self.tool_calls.is_empty() {
            msg["tool_calls"] = self
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments.to_string()},
                    })
                })
                .collect();
        }
        if let Some(id) = &self.tool_call_id {
            msg["tool_call_id"] = json!(id);
        }
        msg
    }
}

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
}

impl CompletionRequest {
    /// System + user prompt, no tools
    pub fn simple(system_prompt: &str, user_prompt: &str, temperature: f32) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)],
            tools: Vec::new(),
            temperature,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

impl CompletionResponse {
    pub fn text(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }
}

/// Generic completion client
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// OpenAI-compatible chat completions over HTTP
pub struct HttpCompletionClient {
    settings: LlmSettings,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            api_key: settings.api_key(),
            settings,
            client,
        })
    }

    fn parse_tool_calls(message: &Value) -> Result<Vec<ToolCallRequest>, LlmError> {
        let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        calls
            .iter()
            .map(|call| {
                let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                let function = call
                    .get("function")
                    .ok_or_else(|| LlmError::InvalidJson("tool call without function".to_string()))?;
                let name = function
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| LlmError::InvalidJson("tool call without name".to_string()))?;
                // Arguments arrive as a JSON string; tolerate objects too
                let arguments = match function.get("arguments") {
                    Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|e| {
                        LlmError::InvalidJson(format!("tool arguments are not JSON: {}", e))
                    })?,
                    Some(other) => other.clone(),
                    None => json!({}),
                };
                Ok(ToolCallRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if self.settings.endpoint.trim().is_empty() {
            return Err(LlmError::Disabled);
        }

        let url = format!(
            "{}/v1/chat/completions",
            self.settings.endpoint.trim_end_matches('/')
        );
        let mut body = json!({
            "model": self.settings.model,
            "messages": request.messages.iter().map(ChatMessage::to_wire).collect::<Vec<_>>(),
            "temperature": request.temperature,
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.settings.timeout_secs)
            } else {
                LlmError::Http(format!("Request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!(
                "HTTP {} from OpenAI-compatible API",
                response.status()
            )));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidJson(format!("Failed to parse response: {}", e)))?;

        let message = response_json
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .ok_or(LlmError::EmptyResponse)?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);
        let tool_calls = Self::parse_tool_calls(message)?;
        if content.is_none() && tool_calls.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let usage = response_json
            .get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok())
            .unwrap_or_default();
        debug!(
            model = %self.settings.model,
            tool_calls = tool_calls.len(),
            "completion received"
        );
        Ok(CompletionResponse {
            content,
            tool_calls,
            usage,
        })
    }
}

/// Fake completion client for testing
pub struct FakeCompletionClient {
    responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeCompletionClient {
    /// Replies are handed out in order; the last one repeats
    pub fn new(responses: Vec<Result<CompletionResponse, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always_text(content: &str) -> Self {
        Self::new(vec![Ok(CompletionResponse::text(content))])
    }

    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CompletionClient for FakeCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        match responses.len() {
            0 => Err(LlmError::EmptyResponse),
            1 => responses[0].clone(),
            _ => responses.remove(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_client_sequence_then_repeat() {
        let client = FakeCompletionClient::new(vec![
            Ok(CompletionResponse::text("first")),
            Err(LlmError::Timeout(30)),
            Ok(CompletionResponse::text("last")),
        ]);
        let req = CompletionRequest::simple("s", "u", 0.3);

        assert_eq!(client.complete(&req).await.unwrap().content.as_deref(), Some("first"));
        assert_eq!(client.complete(&req).await.unwrap_err(), LlmError::Timeout(30));
        assert_eq!(client.complete(&req).await.unwrap().content.as_deref(), Some("last"));
        assert_eq!(client.complete(&req).await.unwrap().content.as_deref(), Some("last"));
        assert_eq!(client.call_count(), 4);
    }

    #[test]
    fn test_wire_format_for_tool_turns() {
        let call = ToolCallRequest {
            id: "call_1".to_string(),
            name: "get_best_moves".to_string(),
            arguments: json!({"position": "opening-3-1"}),
        };
        let assistant = ChatMessage::assistant(None, vec![call]).to_wire();
        assert_eq!(assistant["tool_calls"][0]["type"], "function");
        assert!(assistant["tool_calls"][0]["function"]["arguments"].is_string());

        let tool = ChatMessage::tool_result("call_1", "{}").to_wire();
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
    }

    #[test]
    fn test_parse_tool_calls_from_string_arguments() {
        let message = json!({
            "content": null,
            "tool_calls": [{
                "id": "call_9",
                "type": "function",
                "function": {"name": "verify_move", "arguments": "{\"move\":\"8/5 6/5\"}"}
            }]
        });
        let calls = HttpCompletionClient::parse_tool_calls(&message).unwrap();
        assert_eq!(calls[0].name, "verify_move");
        assert_eq!(calls[0].arguments["move"], "8/5 6/5");
    }
}
