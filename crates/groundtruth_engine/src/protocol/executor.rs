//! Stateless tool executor for the REST transport
//!
//! `POST {engine}/api/mcp` with `{tool, args}`, answer `{success, data?, error?}`.
//! Used by the agentic loop, where the model picks the tool. Network
//! failures come back as `ToolOutcome { unavailable: true, .. }` instead of
//! an error: the loop keeps going without verification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use groundtruth_common::config::TimeoutSettings;
use groundtruth_common::error::{GroundTruthError, Result};
use groundtruth_common::types::EngineConfig;

use super::analysis::parse_engine_data;
use super::client::map_send_error;
use super::{EngineAnswer, GroundTruthEngine, MoveQuery};

pub const QUERY_POSITION: &str = "query_position";
pub const VERIFY_MOVE: &str = "verify_move";
pub const GET_BEST_MOVES: &str = "get_best_moves";

/// Tools the executor will forward; anything else is rejected locally
pub const ALLOWED_TOOLS: &[&str] = &[QUERY_POSITION, VERIFY_MOVE, GET_BEST_MOVES];

const MAX_TOP_N: u64 = 10;

/// Structured result handed back to the caller (and to the model)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Engine unreachable; continue without verification
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default, rename = "executionTimeMs")]
    pub execution_time_ms: u64,
}

impl ToolOutcome {
    fn rejected(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            unavailable: false,
            execution_time_ms: 0,
        }
    }

    fn unavailable(error: String, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            unavailable: true,
            execution_time_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

fn require_str<'a>(args: &'a Map<String, Value>, field: &str) -> std::result::Result<&'a str, String> {
    match args.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(_) => Err(format!("argument '{}' must be a non-empty string", field)),
        None => Err(format!("missing required argument '{}'", field)),
    }
}

fn check_dice(args: &Map<String, Value>) -> std::result::Result<(), String> {
    let Some(dice) = args.get("dice") else {
        return Err("missing required argument 'dice'".to_string());
    };
    let faces: Vec<u64> = match dice {
        Value::Array(items) => items.iter().filter_map(Value::as_u64).collect(),
        Value::String(s) => s
            .chars()
            .filter_map(|c| c.to_digit(10).map(u64::from))
            .collect(),
        _ => Vec::new(),
    };
    if faces.len() == 2 && faces.iter().all(|f| (1..=6).contains(f)) {
        Ok(())
    } else {
        Err("argument 'dice' must be two dice between 1 and 6".to_string())
    }
}

/// Check tool name and argument shape before anything leaves the process
pub fn validate_tool_call(tool: &str, args: &Value) -> std::result::Result<(), String> {
    if !ALLOWED_TOOLS.contains(&tool) {
        return Err(format!(
            "unknown tool '{}' (allowed: {})",
            tool,
            ALLOWED_TOOLS.join(", ")
        ));
    }
    let Some(map) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };
    require_str(map, "position")?;
    match tool {
        QUERY_POSITION => {
            if map.contains_key("dice") {
                check_dice(map)?;
            }
        }
        VERIFY_MOVE => {
            check_dice(map)?;
            require_str(map, "move")?;
        }
        GET_BEST_MOVES => {
            check_dice(map)?;
            if let Some(top_n) = map.get("top_n") {
                match top_n.as_u64() {
                    Some(n) if (1..=MAX_TOP_N).contains(&n) => {}
                    _ => return Err(format!("argument 'top_n' must be 1..={}", MAX_TOP_N)),
                }
            }
        }
        _ => {}
    }
    Ok(())
}

pub struct StatelessToolExecutor {
    config: EngineConfig,
    http: reqwest::Client,
    query_timeout: Duration,
    health_timeout: Duration,
}

impl StatelessToolExecutor {
    pub fn new(config: EngineConfig, timeouts: &TimeoutSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| GroundTruthError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http,
            query_timeout: timeouts.query(),
            health_timeout: timeouts.health(),
        })
    }

    /// Send one validated request; errors keep their taxonomy
    async fn send(&self, tool: &str, args: &Value) -> Result<Value> {
        let url = format!("{}/api/mcp", self.config.base_url());
        let response = self
            .http
            .post(&url)
            .timeout(self.query_timeout)
            .json(&json!({"tool": tool, "args": args}))
            .send()
            .await
            .map_err(|e| map_send_error(e, self.query_timeout))?;

        if !response.status().is_success() {
            return Err(GroundTruthError::Transport(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let reply: RestReply = response
            .json()
            .await
            .map_err(|e| GroundTruthError::Protocol(format!("malformed tool reply: {}", e)))?;
        if !reply.success {
            return Err(GroundTruthError::Engine(
                reply.error.unwrap_or_else(|| "engine reported failure".to_string()),
            ));
        }
        Ok(reply.data.unwrap_or(Value::Null))
    }

    /// Run a tool call requested by the model. Never errors.
    pub async fn execute(&self, tool: &str, args: &Value) -> ToolOutcome {
        if let Err(reason) = validate_tool_call(tool, args) {
            debug!(tool, "rejected tool call: {}", reason);
            return ToolOutcome::rejected(reason);
        }

        let started = Instant::now();
        let result = self.send(tool, args).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(data) => ToolOutcome {
                success: true,
                data: Some(data),
                error: None,
                unavailable: false,
                execution_time_ms,
            },
            Err(e) if e.is_unavailable() => {
                warn!(tool, engine_url = %self.config.engine_url, "engine unavailable: {}", e);
                ToolOutcome::unavailable(e.to_string(), execution_time_ms)
            }
            Err(e) => ToolOutcome {
                execution_time_ms,
                ..ToolOutcome::rejected(e.to_string())
            },
        }
    }
}

#[async_trait]
impl GroundTruthEngine for StatelessToolExecutor {
    fn engine_url(&self) -> &str {
        &self.config.engine_url
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url());
        match self.http.get(&url).timeout(self.health_timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(engine_url = %self.config.engine_url, "health check failed: {}", e);
                false
            }
        }
    }

    fn tool_request(&self, query: &MoveQuery) -> (&'static str, Value) {
        (
            GET_BEST_MOVES,
            json!({
                "position": query.position.canonical(),
                "dice": [query.dice.a, query.dice.b],
                "top_n": query.top_n,
            }),
        )
    }

    async fn best_moves(&self, query: &MoveQuery) -> Result<EngineAnswer> {
        let (_, arguments) = self.tool_request(query);
        validate_tool_call(GET_BEST_MOVES, &arguments).map_err(GroundTruthError::Validation)?;
        let raw = self.send(GET_BEST_MOVES, &arguments).await?;
        let data = parse_engine_data(&raw)?;
        Ok(EngineAnswer {
            tool_name: GET_BEST_MOVES.to_string(),
            arguments,
            raw,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_rejected() {
        let err = validate_tool_call("rm_rf", &json!({"position": "opening-3-1"})).unwrap_err();
        assert!(err.contains("unknown tool"));
    }

    #[test]
    fn test_argument_shapes() {
        assert!(validate_tool_call(QUERY_POSITION, &json!({"position": "opening-3-1"})).is_ok());
        assert!(validate_tool_call(GET_BEST_MOVES, &json!({"position": "opening-3-1", "dice": [3, 1]})).is_ok());
        assert!(validate_tool_call(GET_BEST_MOVES, &json!({"position": "opening-3-1", "dice": "31"})).is_ok());
        assert!(validate_tool_call(GET_BEST_MOVES, &json!({"position": "opening-3-1", "dice": [3, 7]})).is_err());
        assert!(validate_tool_call(VERIFY_MOVE, &json!({"position": "opening-3-1", "dice": [3, 1]})).is_err());
        assert!(validate_tool_call(GET_BEST_MOVES, &json!({"position": "x", "dice": [3, 1], "top_n": 50})).is_err());
        assert!(validate_tool_call(GET_BEST_MOVES, &json!("not an object")).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_unavailable_not_error() {
        let config = EngineConfig {
            enabled: true,
            // Reserved port, nothing listens
            engine_url: "http://127.0.0.1:9".to_string(),
            engine_id: "gnubg".to_string(),
            engine_name: "GNU Backgammon".to_string(),
            domain: "backgammon".to_string(),
            config_id: "test".to_string(),
        };
        let executor = StatelessToolExecutor::new(config, &TimeoutSettings::default()).unwrap();
        let outcome = executor
            .execute(GET_BEST_MOVES, &json!({"position": "opening-3-1", "dice": [3, 1]}))
            .await;
        assert!(!outcome.success);
        assert!(outcome.unavailable);
    }
}
